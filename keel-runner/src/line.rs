//! Splits step output into numbered lines

use chrono::Utc;
use keel_core::domain::log::LogLine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Longest line emitted before the remainder is split into a new line
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Reads `output` to the end, calling `on_line` for every line
///
/// A trailing fragment without a newline is emitted as a final line.
/// Lines longer than [`MAX_LINE_LEN`] are split. Returns the number of
/// lines read.
pub async fn read_lines<R, F>(output: R, on_line: F) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
    F: FnMut(LogLine),
{
    read_lines_bounded(output, MAX_LINE_LEN, on_line).await
}

async fn read_lines_bounded<R, F>(
    output: R,
    max_len: usize,
    mut on_line: F,
) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
    F: FnMut(LogLine),
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    let mut number = 0;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(max_len as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(number);
        }

        let message = String::from_utf8_lossy(&buf);
        let message = message.trim_end_matches(['\n', '\r']);
        on_line(LogLine {
            number,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<LogLine> {
        let mut lines = Vec::new();
        let count = read_lines(input, |line| lines.push(line)).await.unwrap();
        assert_eq!(count, lines.len());
        lines
    }

    #[tokio::test]
    async fn test_read_lines() {
        let lines = collect(b"first\r\nsecond\n\nlast").await;
        let messages: Vec<_> = lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "", "last"]);
        assert_eq!(lines[3].number, 3);
    }

    #[tokio::test]
    async fn test_read_lines_empty() {
        assert!(collect(b"").await.is_empty());
    }

    #[tokio::test]
    async fn test_long_lines_are_split() {
        let mut input = vec![b'a'; 10];
        input.extend_from_slice(b"\nshort\n");

        let mut lines = Vec::new();
        let count = read_lines_bounded(&input[..], 4, |line| lines.push(line.message))
            .await
            .unwrap();

        assert_eq!(count, 5);
        assert_eq!(lines, vec!["aaaa", "aaaa", "aa", "shor", "t"]);
    }

    #[tokio::test]
    async fn test_read_lines_invalid_utf8() {
        let lines = collect(b"ok \xff\n").await;
        assert_eq!(lines[0].message, "ok \u{fffd}");
    }
}
