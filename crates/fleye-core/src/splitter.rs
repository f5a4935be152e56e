//! Header/footer based frame splitting.
//!
//! A chunk is cut on every occurrence of the frame header. Each segment
//! between two headers is kept only if it contains the footer; the bytes
//! before the footer are the frame payload. Segments without a footer are
//! frames cut by the end of the chunk and are picked up whole from the next,
//! overlapping chunk.

use tracing::trace;

/// A header/footer delimited frame found in a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFrame {
    /// Absolute file offset of the frame header
    pub offset: u64,
    /// Bytes between the header and the footer
    pub payload: Vec<u8>,
}

/// Splits a chunk into candidate frames.
///
/// `offset` is the absolute file offset of `chunk[0]`. Bytes before the first
/// header are discarded, they belong to a frame already covered by the
/// previous chunk.
pub fn split(chunk: &[u8], offset: u64, header: &[u8], footer: &[u8]) -> Vec<CandidateFrame> {
    let headers = find_all(chunk, header);
    let mut frames = Vec::with_capacity(headers.len());

    for (i, &start) in headers.iter().enumerate() {
        let body_start = start + header.len();
        let body_end = headers.get(i + 1).copied().unwrap_or(chunk.len());
        let segment = &chunk[body_start..body_end];

        match find_subsequence(segment, footer) {
            Some(footer_pos) => frames.push(CandidateFrame {
                offset: offset + start as u64,
                payload: segment[..footer_pos].to_vec(),
            }),
            None => trace!(
                offset = offset + start as u64,
                len = segment.len(),
                "dropping segment without footer"
            ),
        }
    }

    frames
}

/// Finds every non-overlapping occurrence of `needle`, scanning left to right
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() {
        return positions;
    }

    let mut position = 0;
    while let Some(relative) = find_subsequence(&haystack[position..], needle) {
        let found = position + relative;
        positions.push(found);
        position = found + needle.len();
    }
    positions
}

/// Find a subsequence within a byte slice
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &[u8] = b"HH";
    const FOOTER: &[u8] = b"FF";

    #[test]
    fn test_find_subsequence_locates_markers() {
        let mut data = vec![0x00; 3];
        data.extend_from_slice(&[0xBF; 12]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&[0xEF; 16]);

        assert_eq!(find_subsequence(&data, &[0xBF; 12]), Some(3));
        assert_eq!(find_subsequence(&data, &[0xEF; 16]), Some(19));
        // footer cut short by the end of the chunk
        assert_eq!(find_subsequence(&data[..30], &[0xEF; 16]), None);
        assert_eq!(find_subsequence(&[0xBF; 11], &[0xBF; 12]), None);
        assert_eq!(find_subsequence(&data, &[]), None);
    }

    #[test]
    fn test_find_all_non_overlapping() {
        assert_eq!(find_all(b"aaaaa", b"aa"), vec![0, 2]);
        assert_eq!(find_all(b"xaxbxa", b"xa"), vec![0, 4]);
        assert!(find_all(b"abc", b"").is_empty());
    }

    #[test]
    fn test_split_no_header() {
        assert!(split(b"nothing to see here", 100, HEADER, FOOTER).is_empty());
    }

    #[test]
    fn test_split_frames_with_absolute_offsets() {
        let chunk = b"xxHHabcFFpadHHdefFFHHgh";
        let frames = split(chunk, 1000, HEADER, FOOTER);

        assert_eq!(
            frames,
            vec![
                CandidateFrame {
                    offset: 1002,
                    payload: b"abc".to_vec(),
                },
                CandidateFrame {
                    offset: 1012,
                    payload: b"def".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_split_drops_unterminated_tail() {
        let chunk = b"HHabcFFHHde";
        let frames = split(chunk, 0, HEADER, FOOTER);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"abc".to_vec());
    }

    #[test]
    fn test_split_keeps_offsets_across_empty_segments() {
        let chunk = b"HHHHabFF";
        let frames = split(chunk, 10, HEADER, FOOTER);
        assert_eq!(
            frames,
            vec![CandidateFrame {
                offset: 12,
                payload: b"ab".to_vec(),
            }]
        );
    }
}
