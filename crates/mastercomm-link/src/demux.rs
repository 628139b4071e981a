//! Prefix-matching demultiplexer driven by the reader thread.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mastercomm_protocol::{CommandOutput, Consumed, PartialResult, Printable};
use tracing::{error, trace};

use crate::consumer::Registration;

const PREFIX_LEN: usize = 3;

/// Something the reader thread must act on after a read.
#[derive(Debug)]
pub(crate) enum DemuxEvent {
    /// A registered consumer's response is complete.
    Completed {
        registration: Registration,
        output: CommandOutput,
    },
    /// Bytes no consumer claimed, in arrival order.
    Leftovers(Bytes),
}

/// Routing state carried across reads.
///
/// Holds the consumer currently decoding a response, its partial state, and
/// any tail bytes too short to be matched against a prefix yet.
#[derive(Debug, Default)]
pub(crate) struct Demux {
    buffer: BytesMut,
    current: Option<(Registration, Option<PartialResult>)>,
}

impl Demux {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Route newly read bytes.
    ///
    /// One-shot consumers whose response completes are removed from
    /// `consumers`, as are stopped background consumers.
    pub(crate) fn feed(&mut self, data: &[u8], consumers: &mut Vec<Registration>) -> Vec<DemuxEvent> {
        self.buffer.extend_from_slice(data);
        consumers.retain(Registration::is_active);

        let mut events = Vec::new();
        if self.current.is_some() {
            self.consume_current(consumers, &mut events);
        }
        if self.current.is_some() {
            return events;
        }

        let mut index = start_bytes(consumers);
        let mut leftovers = BytesMut::new();
        while let Some(&first) = self.buffer.first() {
            if let Some(candidates) = index.get(&first) {
                // Responses end in `\r\n` and no prefix starts with it, so a
                // short tail that might be a prefix can safely wait for the
                // next read.
                if self.buffer.len() < PREFIX_LEN {
                    break;
                }
                let matched = candidates
                    .iter()
                    .find(|candidate| candidate.prefix() == self.buffer[..PREFIX_LEN])
                    .cloned();
                if let Some(registration) = matched {
                    trace!(?registration, "matched response prefix");
                    self.buffer.advance(PREFIX_LEN);
                    self.current = Some((registration, None));
                    self.consume_current(consumers, &mut events);
                    index = start_bytes(consumers);
                    continue;
                }
            }
            leftovers.put_u8(first);
            self.buffer.advance(1);
        }

        if !leftovers.is_empty() {
            events.push(DemuxEvent::Leftovers(leftovers.freeze()));
        }
        events
    }

    fn consume_current(&mut self, consumers: &mut Vec<Registration>, events: &mut Vec<DemuxEvent>) {
        let Some((registration, partial)) = self.current.take() else {
            return;
        };
        match registration.spec().consume_output(&self.buffer, partial) {
            Ok(Consumed::Pending { consumed, partial }) => {
                self.buffer.advance(consumed);
                self.current = Some((registration, Some(partial)));
            }
            Ok(Consumed::Done { consumed, output }) => {
                self.buffer.advance(consumed);
                if registration.is_one_shot() {
                    consumers.retain(|other| !other.same(&registration));
                }
                events.push(DemuxEvent::Completed {
                    registration,
                    output,
                });
            }
            Err(err) => {
                // Drop the consumer; the bytes are scanned again for a prefix.
                error!(
                    spec = %registration.spec(),
                    data = %Printable(&self.buffer),
                    %err,
                    "could not decode message from the master"
                );
            }
        }
    }
}

fn start_bytes(consumers: &[Registration]) -> HashMap<u8, Vec<Registration>> {
    let mut index: HashMap<u8, Vec<Registration>> = HashMap::new();
    for registration in consumers {
        index
            .entry(registration.prefix()[0])
            .or_default()
            .push(registration.clone());
    }
    index
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mastercomm_protocol::{api, Field, Fields, MasterCommandSpec};

    use super::*;
    use crate::consumer::Consumer;

    fn completed(events: &[DemuxEvent]) -> Vec<(&Registration, &CommandOutput)> {
        events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Completed {
                    registration,
                    output,
                } => Some((registration, output)),
                DemuxEvent::Leftovers(_) => None,
            })
            .collect()
    }

    fn leftovers(events: &[DemuxEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                DemuxEvent::Leftovers(bytes) => Some(bytes.to_vec()),
                DemuxEvent::Completed { .. } => None,
            })
            .flatten()
            .collect()
    }

    fn ba_reply(cid: u8) -> Vec<u8> {
        api::basic_action()
            .create_output(cid, &Fields::new().with("resp", "OK"))
            .unwrap()
            .to_vec()
    }

    #[test]
    fn routes_complete_response_and_removes_one_shot() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 1);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        let events = demux.feed(&ba_reply(1), &mut consumers);
        let done = completed(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1.fields().str("resp"), Some("OK"));
        assert!(consumers.is_empty());
        assert!(leftovers(&events).is_empty());
    }

    #[test]
    fn prefix_disambiguation_by_action_and_cid() {
        let xa = MasterCommandSpec::new(*b"XA", vec![], vec![Field::bytes("data", 2)]);
        let xb = MasterCommandSpec::new(*b"XB", vec![], vec![Field::bytes("data", 2)]);
        let a = Consumer::new(Arc::new(xa.clone()), 1);
        let a2 = Consumer::new(Arc::new(xa), 2);
        let b = Consumer::new(Arc::new(xb), 1);
        let mut consumers = vec![
            Registration::from(&a),
            Registration::from(&a2),
            Registration::from(&b),
        ];
        let mut demux = Demux::new();

        let events = demux.feed(b"XB\x01hi", &mut consumers);
        let done = completed(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0.prefix(), *b"XB\x01");
        assert_eq!(consumers.len(), 2);
        assert!(consumers.iter().all(|r| r.prefix() != *b"XB\x01"));
    }

    #[test]
    fn reassembles_across_reads() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 3);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();
        let reply = ba_reply(3);

        for split in 1..reply.len() {
            let mut demux_split = Demux::new();
            let mut regs = vec![Registration::from(&consumer)];
            let first = demux_split.feed(&reply[..split], &mut regs);
            assert!(completed(&first).is_empty());
            assert!(leftovers(&first).is_empty(), "split at {split}");
            let second = demux_split.feed(&reply[split..], &mut regs);
            assert_eq!(completed(&second).len(), 1, "split at {split}");
        }

        let events = demux.feed(&reply, &mut consumers);
        assert_eq!(completed(&events).len(), 1);
    }

    #[test]
    fn short_tail_waits_for_next_read() {
        let consumer = Consumer::new(Arc::new(api::output_list()), 0);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        let events = demux.feed(b"abcOL", &mut consumers);
        assert_eq!(leftovers(&events), b"abc");
        let events = demux.feed(b"\x00\x00\r\n", &mut consumers);
        assert_eq!(completed(&events).len(), 1);
        assert!(leftovers(&events).is_empty());
    }

    #[test]
    fn unmatched_bytes_become_leftovers() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 1);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        let mut data = b"hello".to_vec();
        data.extend_from_slice(&ba_reply(1));
        data.extend_from_slice(b" world");
        let events = demux.feed(&data, &mut consumers);
        assert_eq!(completed(&events).len(), 1);
        assert_eq!(leftovers(&events), b"hello world");
    }

    #[test]
    fn matching_prefix_with_wrong_cid_is_leftover() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 2);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        let events = demux.feed(&ba_reply(1), &mut consumers);
        assert!(completed(&events).is_empty());
        assert_eq!(leftovers(&events), ba_reply(1));
        assert_eq!(consumers.len(), 1);
    }

    #[test]
    fn decode_error_drops_consumer_and_rescans() {
        let consumer = Consumer::new(Arc::new(api::output_list()), 0);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        // Literal mismatch after the output list.
        let events = demux.feed(b"OL\x00\x00xx", &mut consumers);
        assert!(completed(&events).is_empty());
        assert_eq!(leftovers(&events), b"\x00xx");

        let events = demux.feed(b"OL\x00\x00\r\n", &mut consumers);
        assert_eq!(completed(&events).len(), 1);
        assert!(consumers.is_empty());
    }

    #[test]
    fn one_shot_matches_once_per_feed() {
        let consumer = Consumer::new(Arc::new(api::basic_action()), 1);
        let mut consumers = vec![Registration::from(&consumer)];
        let mut demux = Demux::new();

        let mut data = ba_reply(1);
        data.extend_from_slice(&ba_reply(1));
        let events = demux.feed(&data, &mut consumers);
        assert_eq!(completed(&events).len(), 1);
        assert_eq!(leftovers(&events), ba_reply(1));
    }
}
