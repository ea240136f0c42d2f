use serde::{Deserialize, Serialize};

/// Forward error correction for a message.
///
/// `ParityCheck` sends `required * (1 + rate)` distinct packets per message
/// and treats the message as reconstructable once `required` distinct ones
/// arrive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FecScheme {
    #[default]
    None,
    ParityCheck { required: u32, rate: f64 },
}

impl FecScheme {
    /// Distinct packets (sequence numbers) per batch.
    pub fn packets_to_send(&self) -> u32 {
        match *self {
            FecScheme::None => 1,
            FecScheme::ParityCheck { required, rate } => packets_to_send(required, rate),
        }
    }

    pub fn required_packets(&self) -> u32 {
        match *self {
            FecScheme::None => 1,
            FecScheme::ParityCheck { required, .. } => required,
        }
    }

    pub fn is_reconstructable(&self, received: u32) -> bool {
        is_reconstructable(received, self.required_packets())
    }
}

/// `required * (1 + rate)`, rounded down. The epsilon absorbs binary
/// representation error so that 10 at 0.2 gives 12 and not 11.
pub fn packets_to_send(required: u32, rate: f64) -> u32 {
    let total = required as f64 * (1.0 + rate);
    (total + 1e-9).floor().max(required as f64) as u32
}

pub fn is_reconstructable(received: u32, required: u32) -> bool {
    received >= required
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reference_values() {
        assert_eq!(packets_to_send(10, 0.2), 12);
        assert!(!is_reconstructable(9, 10));
        assert!(is_reconstructable(10, 10));
    }

    #[test]
    fn none_scheme_needs_one() {
        let fec = FecScheme::None;
        assert_eq!(fec.packets_to_send(), 1);
        assert!(!fec.is_reconstructable(0));
        assert!(fec.is_reconstructable(1));
    }

    #[test]
    fn scheme_deserializes_tagged() {
        let fec: FecScheme =
            serde_json::from_str(r#"{"method":"parity_check","required":4,"rate":0.5}"#).unwrap();
        assert_eq!(fec, FecScheme::ParityCheck { required: 4, rate: 0.5 });
        assert_eq!(fec.packets_to_send(), 6);
    }

    proptest! {
        #[test]
        fn sent_is_never_below_required(required in 1u32..10_000, rate in 0.0f64..4.0) {
            let sent = packets_to_send(required, rate);
            prop_assert!(sent >= required);
            prop_assert!(sent as f64 <= required as f64 * (1.0 + rate) + 1e-6);
        }

        #[test]
        fn reconstructable_iff_enough(received in 0u32..100, required in 1u32..100) {
            prop_assert_eq!(is_reconstructable(received, required), received >= required);
        }
    }
}
