pub mod args;

use clap::Parser;

pub use args::{Arguments, Commands, Toolchain};

pub fn parse() -> Arguments {
    Arguments::parse()
}
