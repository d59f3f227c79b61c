//! ICY (Icecast/Shoutcast) in-band metadata.
//!
//! A stream requested with `Icy-MetaData: 1` answers with an `icy-metaint`
//! header and interleaves its audio with metadata blocks: `metaint` audio bytes,
//! one length byte `n`, then `n * 16` bytes of `Key='value';` text padded with
//! NULs. [`IcyDemuxer`] strips those blocks and surfaces the `StreamTitle`.

use reqwest::header::HeaderMap;

const MAX_METAINT: usize = 256_000;

pub fn metaint_from_headers(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| (1..=MAX_METAINT).contains(n))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Audio { remaining: usize },
    Length,
    Meta { remaining: usize },
}

#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: Option<usize>,
    state: State,
    meta: Vec<u8>,
}

impl IcyDemuxer {
    /// `None` means the server sends plain audio and everything passes through.
    pub fn new(metaint: Option<usize>) -> Self {
        Self {
            metaint,
            state: State::Audio {
                remaining: metaint.unwrap_or(0),
            },
            meta: Vec::with_capacity(255 * 16),
        }
    }

    /// Appends the audio part of `input` to `audio` and returns the last
    /// `StreamTitle` completed inside this chunk, if any.
    pub fn feed(&mut self, mut input: &[u8], audio: &mut Vec<u8>) -> Option<String> {
        let Some(metaint) = self.metaint else {
            audio.extend_from_slice(input);
            return None;
        };

        let mut title = None;
        while !input.is_empty() {
            match self.state {
                State::Audio { remaining } => {
                    let n = remaining.min(input.len());
                    audio.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if remaining == n {
                        State::Length
                    } else {
                        State::Audio {
                            remaining: remaining - n,
                        }
                    };
                }
                State::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.meta.clear();
                    self.state = if len == 0 {
                        State::Audio { remaining: metaint }
                    } else {
                        State::Meta { remaining: len }
                    };
                }
                State::Meta { remaining } => {
                    let n = remaining.min(input.len());
                    self.meta.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if remaining == n {
                        if let Some(t) = parse_stream_title(&self.meta) {
                            title = Some(t);
                        }
                        self.state = State::Audio { remaining: metaint };
                    } else {
                        self.state = State::Meta {
                            remaining: remaining - n,
                        };
                    }
                }
            }
        }
        title
    }
}

/// Extracts the `StreamTitle` value from one metadata block.
///
/// Returns `None` for blocks without the field; an empty title is returned as
/// `Some("")` so a station clearing its title is visible to callers.
pub fn parse_stream_title(block: &[u8]) -> Option<String> {
    let raw = String::from_utf8_lossy(block).replace('\0', "");
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for (open, close) in [("StreamTitle='", "';"), ("StreamTitle=\"", "\";")] {
        if let Some(start) = raw.find(open) {
            let tail = &raw[start + open.len()..];
            let quote = &close[..1];
            let end = tail.find(close).or_else(|| tail.rfind(quote))?;
            return Some(tail[..end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        let padded = bytes.len().div_ceil(16) * 16;
        bytes.resize(padded, 0);
        let mut out = vec![(padded / 16) as u8];
        out.extend(bytes);
        out
    }

    #[test]
    fn parses_single_and_double_quoted_titles() {
        assert_eq!(
            parse_stream_title(b"StreamTitle='Daft Punk - Around the World';StreamUrl='';\0\0"),
            Some("Daft Punk - Around the World".to_string())
        );
        assert_eq!(
            parse_stream_title(b"StreamTitle=\"Live\";"),
            Some("Live".to_string())
        );
        assert_eq!(
            parse_stream_title(b"StreamTitle='It's Alive';"),
            Some("It's Alive".to_string())
        );
        assert_eq!(parse_stream_title(b"StreamTitle='';"), Some(String::new()));
        assert_eq!(parse_stream_title(b"StreamUrl='x';"), None);
        assert_eq!(parse_stream_title(b"\0\0\0"), None);
    }

    #[test]
    fn passthrough_without_metaint() {
        let mut demux = IcyDemuxer::new(None);
        let mut audio = Vec::new();
        assert_eq!(demux.feed(b"abcdef", &mut audio), None);
        assert_eq!(audio, b"abcdef");
    }

    #[test]
    fn strips_metadata_blocks() {
        let mut stream = b"AAAA".to_vec();
        stream.extend(block("StreamTitle='Artist - Song';"));
        stream.extend(b"BBBB");
        stream.push(0);
        stream.extend(b"CC");

        let mut demux = IcyDemuxer::new(Some(4));
        let mut audio = Vec::new();
        let title = demux.feed(&stream, &mut audio);
        assert_eq!(title.as_deref(), Some("Artist - Song"));
        assert_eq!(audio, b"AAAABBBBCC");
    }

    #[test]
    fn blocks_split_across_chunks() {
        let mut stream = b"AAAA".to_vec();
        stream.extend(block("StreamTitle='First';"));
        stream.extend(b"BBBB");
        stream.extend(block("StreamTitle='Second';"));
        stream.extend(b"CCCC");

        let mut demux = IcyDemuxer::new(Some(4));
        let mut audio = Vec::new();
        let mut titles = Vec::new();
        for chunk in stream.chunks(3) {
            if let Some(t) = demux.feed(chunk, &mut audio) {
                titles.push(t);
            }
        }
        assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);
        assert_eq!(audio, b"AAAABBBBCCCC");
    }

    #[test]
    fn metaint_header_bounds() {
        let mut headers = HeaderMap::new();
        assert_eq!(metaint_from_headers(&headers), None);
        headers.insert("icy-metaint", "16000".parse().unwrap());
        assert_eq!(metaint_from_headers(&headers), Some(16000));
        headers.insert("icy-metaint", "0".parse().unwrap());
        assert_eq!(metaint_from_headers(&headers), None);
        headers.insert("icy-metaint", "junk".parse().unwrap());
        assert_eq!(metaint_from_headers(&headers), None);
    }
}
