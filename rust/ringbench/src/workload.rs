//! The message every iteration sends and the check the consumer runs on it.

use std::hint::black_box;

/// Immutable template payload: `'A'` repeated, with a trailing NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    template: Box<[u8]>,
}

impl Workload {
    pub fn template(message_len: usize) -> Self {
        assert!(message_len >= 1, "message length must be at least 1 byte");
        let mut template = vec![b'A'; message_len].into_boxed_slice();
        template[message_len - 1] = 0;
        Self { template }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.template
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.template.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// Copy the template into a slot of the same length.
    #[inline]
    pub fn fill(&self, slot: &mut [u8]) {
        slot.copy_from_slice(&self.template);
    }

    /// What the consumer should report after reading this payload.
    pub fn checksum(&self) -> u64 {
        checksum(&self.template)
    }
}

/// Sum of all bytes.
#[inline]
pub fn checksum(bytes: &[u8]) -> u64 {
    bytes.iter().map(|&b| u64::from(b)).sum()
}

/// What a consumer hands to the completion record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub consumed: u64,
    pub checksum: u64,
}

/// Consumer-side fold over every payload read.
#[derive(Debug, Default)]
pub struct Validator {
    consumed: u64,
    last_checksum: u64,
}

impl Validator {
    #[inline]
    pub fn record(&mut self, payload: &[u8]) {
        self.last_checksum = black_box(checksum(payload));
        self.consumed += 1;
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            consumed: self.consumed,
            checksum: self.last_checksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilobyte_template_sums_to_66495() {
        let w = Workload::template(1024);
        assert_eq!(w.len(), 1024);
        assert_eq!(w.payload()[1023], 0);
        assert!(w.payload()[..1023].iter().all(|&b| b == b'A'));
        assert_eq!(w.checksum(), 66495);
    }

    #[test]
    fn single_byte_template_is_just_the_terminator() {
        let w = Workload::template(1);
        assert_eq!(w.payload(), &[0]);
        assert_eq!(w.checksum(), 0);
    }

    #[test]
    fn validator_keeps_the_last_checksum() {
        let mut v = Validator::default();
        v.record(b"AB");
        v.record(&[1, 2, 3]);
        assert_eq!(
            v.summary(),
            ValidationSummary {
                consumed: 2,
                checksum: 6
            }
        );
    }

    #[test]
    fn fill_copies_the_template() {
        let w = Workload::template(16);
        let mut slot = [0xffu8; 16];
        w.fill(&mut slot);
        assert_eq!(&slot[..], w.payload());
    }
}
