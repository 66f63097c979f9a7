use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use seq_io::fastq::Reader;

use crate::config::defs::PipelineError;
use crate::utils::file::is_gzipped;

pub enum FastqReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl Read for FastqReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FastqReader::Uncompressed(r) => r.read(buf),
            FastqReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Opens a FASTQ file, decompressing it when it starts with the gzip magic bytes.
pub fn fastq_reader(path: &Path) -> io::Result<Reader<FastqReader>> {
    let file = BufReader::new(File::open(path)?);
    let reader = if is_gzipped(path)? {
        Reader::new(FastqReader::Gzipped(MultiGzDecoder::new(file)))
    } else {
        Reader::new(FastqReader::Uncompressed(file))
    };
    Ok(reader)
}

/// Counts the records in a FASTQ file.
///
/// # Arguments
///
/// * `path` - Plain or gzipped FASTQ.
///
/// # Returns
/// Number of records, or InvalidInput if the file is not valid FASTQ.
pub fn count_reads(path: &Path) -> Result<u64, PipelineError> {
    let mut reader = fastq_reader(path)?;
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        record.map_err(|e| PipelineError::InvalidInput {
            path: path.to_path_buf(),
            reason: format!("malformed FASTQ after {} records: {}", count, e),
        })?;
        count += 1;
    }
    Ok(count)
}
