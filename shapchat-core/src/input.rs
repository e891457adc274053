//! User input acquisition

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Result, ShapchatError};

/// Source of user input lines
#[async_trait]
pub trait InputSource: Send {
    /// Next line with the trailing newline and surrounding whitespace removed.
    /// `None` means end of input.
    ///
    /// A line that cannot be decoded is consumed and reported as
    /// [`ShapchatError::InvalidInput`]; the next call reads the following line.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Line-oriented input over any async buffered reader (stdin, sockets, test mocks)
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl LineReader<tokio::io::BufReader<tokio::io::Stdin>> {
    /// Read from the process's standard input
    pub fn stdin() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> InputSource for LineReader<R> {
    async fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        match std::str::from_utf8(&self.buf) {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(e) => Err(ShapchatError::InvalidInput(format!(
                "line is not valid UTF-8 ({})",
                e
            ))),
        }
    }
}
