/*
One state transfer can carry the state of several services at once: the member supplying state
writes one record per registered provider and the joining member reads them back, handing each
payload to whichever service asked for it. Each record is
- the service name, as a u16 big-endian byte count followed by UTF-8 bytes
- the payload, as a u32 big-endian byte count followed by the bytes themselves
The stream simply ends after the last record, so an empty stream is valid.
*/

use std::io::{self, ErrorKind, Read, Write};

#[cfg(debug_assertions)]
use log::debug;

use crate::{
    data_types::{PayloadLength, ServiceNameLength},
    errors::{StateStreamError, StateStreamResult},
};

const SERVICE_NAME_LENGTH_SIZE: usize = std::mem::size_of::<ServiceNameLength>();
const PAYLOAD_LENGTH_SIZE: usize = std::mem::size_of::<PayloadLength>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecordHeader {
    pub service_name: String,
    pub payload_length: PayloadLength,
}

pub struct StateRecordWriter<W: Write> {
    output: W,
    record_count: usize,
}

impl<W: Write> StateRecordWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            record_count: 0,
        }
    }

    pub fn write_record(self: &mut Self, service_name: &str, payload: &[u8]) -> StateStreamResult<()> {
        let name = service_name.as_bytes();
        let name_length = ServiceNameLength::try_from(name.len())
            .map_err(|_| StateStreamError::ServiceNameTooLong(name.len()))?;
        let payload_length = PayloadLength::try_from(payload.len())
            .map_err(|_| StateStreamError::PayloadTooLarge(payload.len()))?;

        self.output.write_all(&name_length.to_be_bytes())?;
        self.output.write_all(name)?;
        self.output.write_all(&payload_length.to_be_bytes())?;
        self.output.write_all(payload)?;
        self.record_count += 1;
        Ok(())
    }

    pub fn record_count(self: &Self) -> usize {
        self.record_count
    }

    pub fn finish(mut self: Self) -> StateStreamResult<W> {
        self.output.flush()?;
        Ok(self.output)
    }
}

pub struct StateRecordReader<R: Read> {
    input: R,
}

impl<R: Read> StateRecordReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Reads the header of the next record. Returns `None` when the stream ends cleanly on a
    /// record boundary. The caller must follow a header with either `read_payload` or
    /// `skip_payload` before asking for the next one.
    pub fn next_header(self: &mut Self) -> StateStreamResult<Option<StateRecordHeader>> {
        let mut name_length = [0u8; SERVICE_NAME_LENGTH_SIZE];
        if !self.fill_or_eof(&mut name_length, "service name length")? {
            return Ok(None);
        }

        let mut name = vec![0u8; ServiceNameLength::from_be_bytes(name_length) as usize];
        self.fill(&mut name, "service name")?;
        let service_name = String::from_utf8(name).map_err(|_| StateStreamError::InvalidServiceName)?;

        let mut payload_length = [0u8; PAYLOAD_LENGTH_SIZE];
        self.fill(&mut payload_length, "payload length")?;

        Ok(Some(StateRecordHeader {
            service_name,
            payload_length: PayloadLength::from_be_bytes(payload_length),
        }))
    }

    pub fn read_payload(self: &mut Self, header: &StateRecordHeader) -> StateStreamResult<Vec<u8>> {
        let mut payload = vec![0u8; header.payload_length as usize];
        self.fill(&mut payload, "payload")?;
        Ok(payload)
    }

    /// Discards exactly the declared payload of a record nobody asked for
    pub fn skip_payload(self: &mut Self, header: &StateRecordHeader) -> StateStreamResult<()> {
        #[cfg(debug_assertions)]
        debug!(
            "StateRecordReader: skipping {} bytes of state for {}",
            header.payload_length, header.service_name
        );

        let expected = header.payload_length as u64;
        let skipped = io::copy(&mut (&mut self.input).take(expected), &mut io::sink())?;
        if skipped < expected {
            return Err(StateStreamError::Truncated("skipped payload"));
        }
        Ok(())
    }

    fn fill(self: &mut Self, buffer: &mut [u8], what: &'static str) -> StateStreamResult<()> {
        match self.input.read_exact(buffer) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(StateStreamError::Truncated(what)),
            Err(err) => Err(StateStreamError::Io(err)),
        }
    }

    /// Like `fill`, but reaching the end of the stream before the first byte is not an error
    fn fill_or_eof(self: &mut Self, buffer: &mut [u8], what: &'static str) -> StateStreamResult<bool> {
        let mut filled = 0;
        while filled < buffer.len() {
            match self.input.read(&mut buffer[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(StateStreamError::Truncated(what)),
                Ok(count) => filled += count,
                Err(err) if err.kind() == ErrorKind::Interrupted => (),
                Err(err) => return Err(StateStreamError::Io(err)),
            }
        }
        Ok(true)
    }
}
