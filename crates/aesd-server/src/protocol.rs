//! Line protocol spoken by clients.
//!
//! Every newline-terminated line is either the seek control line
//! `AESDCHAR_IOCSEEKTO:<index>,<offset>` or an ordinary record.

use aesd_store::SeekTo;

use crate::error::{ServerError, ServerResult};

/// Prefix reserved for the seek control line.
pub const SEEK_COMMAND_PREFIX: &[u8] = b"AESDCHAR_IOCSEEKTO:";

#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    /// Reposition this connection's read cursor.
    Seek(SeekTo),
    /// Commit the line, newline included, as a record.
    Append(&'a [u8]),
}

impl<'a> Request<'a> {
    /// Classify one line, terminator included.
    ///
    /// Lines that start with the seek prefix but carry malformed arguments
    /// are rejected rather than stored.
    pub fn parse(line: &'a [u8]) -> ServerResult<Self> {
        match line.strip_prefix(SEEK_COMMAND_PREFIX) {
            Some(args) => parse_seek_args(args).map(Self::Seek),
            None => Ok(Self::Append(line)),
        }
    }
}

fn parse_seek_args(args: &[u8]) -> ServerResult<SeekTo> {
    let text = std::str::from_utf8(args)
        .map_err(|_| ServerError::InvalidCommand("seek arguments are not UTF-8".into()))?
        .trim_end_matches(['\n', '\r']);
    let (index, offset) = text
        .split_once(',')
        .ok_or_else(|| {
            ServerError::InvalidCommand(format!("expected <index>,<offset>, got {text:?}"))
        })?;
    let parse = |field: &str, name: &str| {
        field.trim().parse::<usize>().map_err(|e| {
            ServerError::InvalidCommand(format!("bad seek {name} {field:?}: {e}"))
        })
    };
    Ok(SeekTo::new(parse(index, "index")?, parse(offset, "offset")?))
}

/// Split `buf` at its last newline. Returns the complete lines (terminators
/// included) and leaves any trailing partial line in place.
pub fn take_complete_lines(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buf.iter().rposition(|b| *b == b'\n')? + 1;
    let rest = buf.split_off(end);
    Some(std::mem::replace(buf, rest))
}
