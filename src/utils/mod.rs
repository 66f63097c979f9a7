pub mod command;
pub mod environment;
pub mod fastq;
pub mod file;
pub mod intake;
pub mod registry;
pub mod scheduler;
pub mod stage;
pub mod system;
