//! embedded-sdlog - Sample records
//!
//! Appends water quality samples to a CSV log file, one CRLF-terminated line
//! per sample, under a header row that is written once when the file is
//! created.
//!
//! The file itself is owned by a filesystem layer that sits on a
//! [`BlockDevice`](crate::BlockDevice); this module only sees it through
//! [`LogFile`].

use core::fmt::Write;

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The first line of every log file.
pub const HEADER: &str = "PH,TDS,TEMP,TURB\r\n";

/// The longest line we will write, terminator included.
pub const MAX_LINE_LEN: usize = 64;

/// One set of readings.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sample {
    /// pH, 0 to 14.
    pub ph: f32,
    /// Total dissolved solids, in ppm.
    pub tds: f32,
    /// Water temperature, in degrees Celsius.
    pub temperature: f32,
    /// Turbidity, in NTU.
    pub turbidity: f32,
}

/// An open, append-only file provided by the filesystem layer.
pub trait LogFile {
    /// The errors the filesystem can return.
    type Error: core::fmt::Debug;
    /// The current length of the file in bytes.
    fn len(&mut self) -> Result<u64, Self::Error>;
    /// Append `data` to the end of the file, returning how much was written.
    fn append(&mut self, data: &[u8]) -> Result<usize, Self::Error>;
    /// Commit everything appended so far to the medium.
    fn sync(&mut self) -> Result<(), Self::Error>;
}

/// The ways logging a record can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogError<E> {
    /// The filesystem failed.
    File(E),
    /// The filesystem took fewer bytes than we gave it.
    ShortWrite {
        /// Bytes we asked it to write.
        expected: usize,
        /// Bytes it says it wrote.
        written: usize,
    },
    /// The formatted record does not fit in a line.
    RecordTooLong,
}

impl<E> From<E> for LogError<E> {
    fn from(e: E) -> Self {
        LogError::File(e)
    }
}

/// A fixed-capacity buffer holding one formatted line.
pub struct Line {
    buf: [u8; MAX_LINE_LEN],
    len: usize,
}

impl Line {
    /// Format `sample` as `pH,TDS,TEMP,TURB\r\n`. TDS is whole ppm, the rest
    /// have two decimal places.
    pub fn format(sample: &Sample) -> Option<Line> {
        let mut line = Line {
            buf: [0u8; MAX_LINE_LEN],
            len: 0,
        };
        write!(
            line,
            "{:.2},{:.0},{:.2},{:.2}\r\n",
            sample.ph, sample.tds, sample.temperature, sample.turbidity
        )
        .ok()?;
        Some(line)
    }

    /// The formatted bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let end = self.len + s.len();
        if end > MAX_LINE_LEN {
            return Err(core::fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// Appends samples to a log file.
///
/// Every record is synced as soon as it is written, so a power cut loses at
/// most the record being written.
pub struct DataLogger<F>
where
    F: LogFile,
{
    file: F,
}

impl<F> DataLogger<F>
where
    F: LogFile,
{
    /// Start logging to `file`, writing the header if the file is empty.
    pub fn open(mut file: F) -> Result<Self, LogError<F::Error>> {
        if file.len()? == 0 {
            debug!("new log file, writing header");
            append_all(&mut file, HEADER.as_bytes())?;
            file.sync()?;
        }
        Ok(DataLogger { file })
    }

    /// Append one record and sync it.
    ///
    /// An error means this record was not logged. Nothing else is affected,
    /// so callers should carry on sampling.
    pub fn log(&mut self, sample: &Sample) -> Result<(), LogError<F::Error>> {
        let line = Line::format(sample).ok_or(LogError::RecordTooLong)?;
        if let Err(e) = append_all(&mut self.file, line.as_bytes()) {
            warn!("log record dropped");
            return Err(e);
        }
        self.file.sync()?;
        Ok(())
    }

    /// Sync and hand back the file.
    pub fn close(mut self) -> Result<F, LogError<F::Error>> {
        self.file.sync()?;
        Ok(self.file)
    }
}

fn append_all<F>(file: &mut F, data: &[u8]) -> Result<(), LogError<F::Error>>
where
    F: LogFile,
{
    let written = file.append(data)?;
    if written != data.len() {
        return Err(LogError::ShortWrite {
            expected: data.len(),
            written,
        });
    }
    Ok(())
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
