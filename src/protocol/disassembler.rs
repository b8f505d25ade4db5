//! Splits a logical message into size-bounded frames.
//!
//! The control payload comes first under the exchange id, followed by each
//! attached stream under its own id. Every sequence ends with an `end` frame,
//! so an empty payload still produces exactly one (empty) frame.
//!
//! ```
//! use streamwire::protocol::{Disassembler, FrameType};
//! use bytes::Bytes;
//! use uuid::Uuid;
//!
//! let id = Uuid::new_v4();
//! let frames: Vec<_> =
//!     Disassembler::new(FrameType::Request, id, Bytes::from_static(b"hello"), Vec::new(), 3)
//!         .collect();
//!
//! assert_eq!(frames.len(), 2);
//! assert_eq!(frames[0].payload(), b"hel");
//! assert_eq!(frames[1].payload(), b"lo");
//! assert!(frames[1].is_end());
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use uuid::Uuid;

use super::{Frame, FrameType};

/// One payload waiting to be sliced.
#[derive(Debug)]
struct Segment {
    frame_type: FrameType,
    id: Uuid,
    remaining: Bytes,
    emitted: bool,
}

/// Single-pass iterator over the frames of one logical message.
#[derive(Debug)]
pub struct Disassembler {
    segments: VecDeque<Segment>,
    max_frame_size: usize,
}

impl Disassembler {
    /// Build a disassembler for a control payload and its attached streams.
    ///
    /// A `max_frame_size` of 0 is treated as 1.
    pub fn new(
        control_type: FrameType,
        id: Uuid,
        control: Bytes,
        streams: Vec<(Uuid, Bytes)>,
        max_frame_size: usize,
    ) -> Self {
        let mut segments = VecDeque::with_capacity(streams.len() + 1);
        segments.push_back(Segment {
            frame_type: control_type,
            id,
            remaining: control,
            emitted: false,
        });
        for (stream_id, body) in streams {
            segments.push_back(Segment {
                frame_type: FrameType::Stream,
                id: stream_id,
                remaining: body,
                emitted: false,
            });
        }

        Self {
            segments,
            max_frame_size: max_frame_size.max(1),
        }
    }
}

impl Iterator for Disassembler {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let segment = self.segments.front_mut()?;

        let take = segment.remaining.len().min(self.max_frame_size);
        let chunk = segment.remaining.split_to(take);
        let end = segment.remaining.is_empty();
        segment.emitted = true;

        let frame = Frame::new(segment.frame_type, segment.id, chunk, end);
        if end {
            self.segments.pop_front();
        }
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n: usize = self
            .segments
            .iter()
            .map(|s| {
                if s.remaining.is_empty() {
                    usize::from(!s.emitted)
                } else {
                    s.remaining.len().div_ceil(self.max_frame_size)
                }
            })
            .sum();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Disassembler {}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(control: &'static [u8], streams: Vec<(Uuid, Bytes)>, max: usize) -> Vec<Frame> {
        Disassembler::new(
            FrameType::Request,
            Uuid::nil(),
            Bytes::from_static(control),
            streams,
            max,
        )
        .collect()
    }

    #[test]
    fn test_hello_in_two_frames() {
        let id = Uuid::new_v4();
        let frames: Vec<Frame> =
            Disassembler::new(FrameType::Request, id, Bytes::from_static(b"hello"), vec![], 3)
                .collect();

        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].frame_type(), FrameType::Request);
        assert_eq!(frames[0].id(), id);
        assert_eq!(frames[0].header.payload_length, 3);
        assert!(!frames[0].is_end());
        assert_eq!(frames[0].payload(), b"hel");

        assert_eq!(frames[1].frame_type(), FrameType::Request);
        assert_eq!(frames[1].id(), id);
        assert_eq!(frames[1].header.payload_length, 2);
        assert!(frames[1].is_end());
        assert_eq!(frames[1].payload(), b"lo");
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_frame() {
        let frames = collect(b"abcdef", vec![], 3);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_end());
        assert_eq!(frames[1].payload(), b"def");
    }

    #[test]
    fn test_empty_control_yields_one_end_frame() {
        let frames = collect(b"", vec![], 16);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_end());
        assert_eq!(frames[0].payload_len(), 0);
    }

    #[test]
    fn test_streams_follow_control_under_own_ids() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let frames = collect(
            b"ctl",
            vec![
                (s1, Bytes::from_static(b"12345")),
                (s2, Bytes::new()),
            ],
            2,
        );

        let kinds: Vec<(FrameType, Uuid, bool)> = frames
            .iter()
            .map(|f| (f.frame_type(), f.id(), f.is_end()))
            .collect();

        assert_eq!(
            kinds,
            vec![
                (FrameType::Request, Uuid::nil(), false),
                (FrameType::Request, Uuid::nil(), true),
                (FrameType::Stream, s1, false),
                (FrameType::Stream, s1, false),
                (FrameType::Stream, s1, true),
                (FrameType::Stream, s2, true),
            ]
        );
    }

    #[test]
    fn test_zero_max_frame_size_treated_as_one() {
        let frames = collect(b"abc", vec![], 0);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.payload_len() == 1));
    }

    #[test]
    fn test_size_hint_is_exact() {
        let mut it = Disassembler::new(
            FrameType::Response,
            Uuid::nil(),
            Bytes::from_static(b"0123456789"),
            vec![(Uuid::new_v4(), Bytes::new())],
            4,
        );
        assert_eq!(it.len(), 4);
        it.next();
        assert_eq!(it.len(), 3);
        assert_eq!(it.count(), 3);
    }
}
