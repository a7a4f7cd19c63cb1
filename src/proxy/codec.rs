use std::io::{BufRead, ErrorKind};

use anyhow::{Result, anyhow, bail, ensure};

/// Upper bound on request header lines drained after the request line.
pub const MAX_HEADER_LINES: usize = 100;

/// Reads one `\n`-terminated line of at most `max_len` bytes, including the terminator.
///
/// Returns `Ok(None)` on a clean EOF before any byte was read.
pub fn read_line_limited<R>(reader: &mut R, max_len: usize) -> Result<Option<String>>
where
    R: BufRead,
{
    ensure!(max_len > 0, "line length limit must be greater than zero");
    let mut collected = Vec::new();

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                bail!("timed out reading line");
            }
            Err(err) => return Err(err.into()),
        };

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(None);
            }
            bail!("connection closed while reading line");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected
            .len()
            .checked_add(consume)
            .ok_or_else(|| anyhow!("line length overflow"))?
            > max_len
        {
            bail!("line exceeds configured limit of {max_len} bytes");
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = String::from_utf8(collected).map_err(|_| anyhow!("line contained invalid bytes"))?;
    Ok(Some(line))
}

/// Consumes header lines up to and including the blank line that ends the head.
pub fn drain_headers<R>(reader: &mut R, max_len: usize) -> Result<usize>
where
    R: BufRead,
{
    let mut count = 0usize;
    loop {
        let Some(line) = read_line_limited(reader, max_len)? else {
            return Ok(count);
        };
        if line == "\r\n" || line == "\n" {
            return Ok(count);
        }
        count += 1;
        ensure!(
            count <= MAX_HEADER_LINES,
            "request has more than {MAX_HEADER_LINES} header lines"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn reads_successive_lines() {
        let mut reader = BufReader::new(Cursor::new("GET / HTTP/1.0\r\nHost: a\r\n\r\n"));
        assert_eq!(
            read_line_limited(&mut reader, 64).unwrap().as_deref(),
            Some("GET / HTTP/1.0\r\n")
        );
        assert_eq!(drain_headers(&mut reader, 64).unwrap(), 1);
        assert_eq!(read_line_limited(&mut reader, 64).unwrap(), None);
    }

    #[test]
    fn reads_lines_split_across_buffer_fills() {
        let mut reader = BufReader::with_capacity(4, Cursor::new("abcdefgh\nrest\n"));
        assert_eq!(
            read_line_limited(&mut reader, 64).unwrap().as_deref(),
            Some("abcdefgh\n")
        );
    }

    #[test]
    fn rejects_lines_over_limit() {
        let mut reader = BufReader::new(Cursor::new(format!("GET /{} HTTP/1.0\r\n", "a".repeat(64))));
        let err = read_line_limited(&mut reader, 32).unwrap_err();
        assert!(err.to_string().contains("exceeds configured limit"), "{err}");
    }

    #[test]
    fn rejects_truncated_line() {
        let mut reader = BufReader::new(Cursor::new("GET / HTTP/1.0"));
        let err = read_line_limited(&mut reader, 64).unwrap_err();
        assert!(err.to_string().contains("connection closed"), "{err}");
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut reader = BufReader::new(Cursor::new(vec![0xff, 0xfe, b'\n']));
        assert!(read_line_limited(&mut reader, 64).is_err());
    }

    #[test]
    fn limits_header_count() {
        let mut head = String::new();
        for i in 0..=MAX_HEADER_LINES {
            head.push_str(&format!("X-{i}: v\r\n"));
        }
        head.push_str("\r\n");
        let mut reader = BufReader::new(Cursor::new(head));
        assert!(drain_headers(&mut reader, 64).is_err());
    }

    #[test]
    fn drain_stops_at_eof_without_blank_line() {
        let mut reader = BufReader::new(Cursor::new("Host: a\r\n"));
        assert_eq!(drain_headers(&mut reader, 64).unwrap(), 1);
    }
}
