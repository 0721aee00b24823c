//! Hold invoices and their HTLCs.
//!
//! An [`Invoice`] is a pure value; every state change goes through one of
//! the `check_*` methods, which validate a proposed transition and return a
//! [`Transition`] without mutating anything. The [`InvoiceManager`] owns the
//! live invoices, serializes transitions, and publishes each committed
//! snapshot to subscribers.
//!
//! ```text
//!           htlc accepted          settle
//!   OPEN ----------------> HELD ---------> CONFIRMED
//!    ^  \                  |  |
//!    |   \   cancel        |  | cancel
//!    |    '-----------.    |  '--------.
//!    |                 v   |           v
//!    '---------------- CANCELED <------'
//!   all held htlcs
//!   canceled
//! ```

use common::{
    api::error::NodeApiError,
    ln::{
        amount::tokens_from_mtokens,
        channel::ChannelId,
        hashes::{PaymentHash, PaymentSecret},
        tlv::TlvRecord,
    },
    time::TimestampMs,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Owns the live invoices and serializes their transitions.
pub mod manager;
/// Ordered snapshot delivery to invoice watchers.
pub mod subscription;

pub use manager::InvoiceManager;
pub use subscription::InvoiceSubscription;

/// A hold invoice as last observed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: PaymentHash,
    pub tokens: u64,
    pub cltv_delta: u32,
    pub description: Option<String>,
    /// The encoded payment request, if the node produced one.
    pub request: Option<String>,
    /// Known once the invoice is settled.
    pub secret: Option<PaymentSecret>,
    pub state: InvoiceState,
    pub created_at: TimestampMs,
    pub created_height: u32,
    pub confirmed_at: Option<TimestampMs>,
    pub canceled_at: Option<TimestampMs>,
    pub htlcs: Vec<Htlc>,
    /// Incremented on every committed transition. Subscribers use this to
    /// deliver each snapshot at most once, in order.
    pub revision: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum InvoiceState {
    Open,
    Held,
    Canceled,
    Confirmed,
}

/// An incoming HTLC paying an invoice. Identified by
/// `(channel_id, htlc_index)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Htlc {
    /// The channel the HTLC arrived on.
    pub channel_id: ChannelId,
    pub htlc_index: u64,
    /// Set while the HTLC is held; cleared once it resolves.
    pub pending_index: Option<u64>,
    pub mtokens: u64,
    pub state: HtlcState,
    pub created_at: TimestampMs,
    pub created_height: u32,
    pub confirmed_at: Option<TimestampMs>,
    pub canceled_at: Option<TimestampMs>,
    /// Custom TLV records the sender attached.
    pub messages: Vec<TlvRecord>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum HtlcState {
    Held,
    Canceled,
    Confirmed,
}

/// A node-side event concerning a single invoice.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    HtlcAccepted(HtlcAccepted),
    HtlcCanceled {
        channel_id: ChannelId,
        htlc_index: u64,
    },
    Settled {
        secret: PaymentSecret,
    },
    Canceled,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HtlcAccepted {
    pub channel_id: ChannelId,
    pub htlc_index: u64,
    pub mtokens: u64,
    pub created_at: TimestampMs,
    pub created_height: u32,
    pub messages: Vec<TlvRecord>,
}

/// The validated result of a `check_*` method. Must be committed by the
/// [`InvoiceManager`] for it to take effect.
#[must_use]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    /// The invoice changed; publish the new snapshot.
    Changed(Invoice),
    /// Nothing to do. Carries a short description for logging.
    Unchanged(&'static str),
}

// --- impl Invoice --- //

impl Invoice {
    pub fn new(
        id: PaymentHash,
        tokens: u64,
        cltv_delta: u32,
        created_at: TimestampMs,
        created_height: u32,
    ) -> Self {
        Self {
            id,
            tokens,
            cltv_delta,
            description: None,
            request: None,
            secret: None,
            state: InvoiceState::Open,
            created_at,
            created_height,
            confirmed_at: None,
            canceled_at: None,
            htlcs: Vec::new(),
            revision: 0,
        }
    }

    /// Whether the invoice has reached `CONFIRMED` or `CANCELED`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// A terminal invoice with no HTLCs still held. No further snapshots
    /// will follow.
    pub fn is_resolved(&self) -> bool {
        self.is_terminal() && self.held_htlcs().next().is_none()
    }

    pub fn held_htlcs(&self) -> impl Iterator<Item = &Htlc> {
        self.htlcs
            .iter()
            .filter(|htlc| htlc.state == HtlcState::Held)
    }

    /// Sum of the held HTLCs' amounts.
    pub fn held_mtokens(&self) -> u64 {
        self.held_htlcs().map(|htlc| htlc.mtokens).sum()
    }

    fn find_htlc(&self, channel_id: ChannelId, htlc_index: u64) -> Option<usize> {
        self.htlcs.iter().position(|htlc| {
            htlc.channel_id == channel_id && htlc.htlc_index == htlc_index
        })
    }

    /// Recompute the non-terminal state from the HTLC set.
    fn recompute_state(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.state = if self.held_htlcs().next().is_some() {
            InvoiceState::Held
        } else {
            InvoiceState::Open
        };
    }

    /// Bump the revision and wrap as a [`Transition::Changed`].
    fn changed(mut self) -> Transition {
        self.revision += 1;
        Transition::Changed(self)
    }

    // --- State transitions --- //

    /// Validate a node-side event against the current state.
    ///
    /// Events for an invoice which already reached a terminal state are
    /// dropped, as are duplicate or unknown HTLC notifications.
    pub fn check_event(
        &self,
        event: &InvoiceEvent,
        now: TimestampMs,
    ) -> Result<Transition, NodeApiError> {
        match event {
            InvoiceEvent::HtlcAccepted(accepted) =>
                Ok(self.check_htlc_accepted(accepted)),
            InvoiceEvent::HtlcCanceled {
                channel_id,
                htlc_index,
            } => Ok(self.check_htlc_canceled(*channel_id, *htlc_index, now)),
            InvoiceEvent::Settled { secret } => self.check_settle(secret, now),
            InvoiceEvent::Canceled => {
                if self.state == InvoiceState::Confirmed {
                    warn!(id = %self.id, "Node canceled a confirmed invoice");
                    return Ok(Transition::Unchanged(
                        "cancel for confirmed invoice",
                    ));
                }
                self.check_cancel(now)
            }
        }
    }

    fn check_htlc_accepted(&self, accepted: &HtlcAccepted) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged("htlc for resolved invoice");
        }
        if self
            .find_htlc(accepted.channel_id, accepted.htlc_index)
            .is_some()
        {
            return Transition::Unchanged("duplicate htlc");
        }

        let mut invoice = self.clone();
        invoice.htlcs.push(Htlc {
            channel_id: accepted.channel_id,
            htlc_index: accepted.htlc_index,
            pending_index: Some(accepted.htlc_index),
            mtokens: accepted.mtokens,
            state: HtlcState::Held,
            created_at: accepted.created_at,
            created_height: accepted.created_height,
            confirmed_at: None,
            canceled_at: None,
            messages: accepted.messages.clone(),
        });
        invoice.recompute_state();
        invoice.changed()
    }

    fn check_htlc_canceled(
        &self,
        channel_id: ChannelId,
        htlc_index: u64,
        now: TimestampMs,
    ) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged("htlc cancel for resolved invoice");
        }
        let Some(idx) = self.find_htlc(channel_id, htlc_index) else {
            return Transition::Unchanged("cancel for unknown htlc");
        };
        if self.htlcs[idx].state != HtlcState::Held {
            return Transition::Unchanged("htlc already resolved");
        }

        let mut invoice = self.clone();
        invoice.htlcs[idx].resolve(HtlcState::Canceled, now);
        invoice.recompute_state();
        invoice.changed()
    }

    /// Validate settling with `secret`.
    ///
    /// - A secret which doesn't hash to the invoice id always fails.
    /// - Settling a canceled invoice fails.
    /// - Settling a confirmed invoice again is a no-op.
    pub fn check_settle(
        &self,
        secret: &PaymentSecret,
        now: TimestampMs,
    ) -> Result<Transition, NodeApiError> {
        use InvoiceState::*;

        if !secret.matches(&self.id) {
            return Err(NodeApiError::invalid_secret(format!(
                "Secret does not hash to {}",
                self.id
            )));
        }

        match self.state {
            Open | Held => (),
            Confirmed => return Ok(Transition::Unchanged("already settled")),
            Canceled =>
                return Err(NodeApiError::invalid_state(format!(
                    "Invoice {} is canceled",
                    self.id
                ))),
        }

        let mut invoice = self.clone();
        invoice.secret = Some(*secret);
        invoice.state = Confirmed;
        invoice.confirmed_at = Some(now);
        for htlc in invoice.htlcs.iter_mut() {
            if htlc.state == HtlcState::Held {
                htlc.resolve(HtlcState::Confirmed, now);
            }
        }
        Ok(invoice.changed())
    }

    /// Validate canceling the invoice. Canceling twice is a no-op;
    /// canceling a confirmed invoice fails.
    pub fn check_cancel(
        &self,
        now: TimestampMs,
    ) -> Result<Transition, NodeApiError> {
        use InvoiceState::*;

        match self.state {
            Open | Held => (),
            Canceled => return Ok(Transition::Unchanged("already canceled")),
            Confirmed =>
                return Err(NodeApiError::invalid_state(format!(
                    "Invoice {} is already confirmed",
                    self.id
                ))),
        }

        let mut invoice = self.clone();
        invoice.state = Canceled;
        invoice.canceled_at = Some(now);
        for htlc in invoice.htlcs.iter_mut() {
            if htlc.state == HtlcState::Held {
                htlc.resolve(HtlcState::Canceled, now);
            }
        }
        Ok(invoice.changed())
    }
}

// --- impl Htlc --- //

impl Htlc {
    pub fn tokens(&self) -> u64 {
        tokens_from_mtokens(self.mtokens)
    }

    fn resolve(&mut self, state: HtlcState, now: TimestampMs) {
        debug_assert_eq!(self.state, HtlcState::Held);
        match state {
            HtlcState::Confirmed => self.confirmed_at = Some(now),
            HtlcState::Canceled => self.canceled_at = Some(now),
            HtlcState::Held => unreachable!("Can't resolve into Held"),
        }
        self.state = state;
        self.pending_index = None;
    }
}

impl InvoiceState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Confirmed)
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;
    use proptest::{
        arbitrary::any, collection, prop_assert, prop_assert_eq, prop_oneof,
        proptest, strategy::Strategy,
    };

    use super::*;

    const NOW: TimestampMs = TimestampMs::MIN;

    fn secret() -> PaymentSecret {
        PaymentSecret::new([42; 32])
    }

    fn open_invoice() -> Invoice {
        Invoice::new(secret().compute_hash(), 100, 40, NOW, 500)
    }

    fn accepted(channel: u32, htlc_index: u64) -> InvoiceEvent {
        InvoiceEvent::HtlcAccepted(HtlcAccepted {
            channel_id: ChannelId::new(443, channel, 0),
            htlc_index,
            mtokens: 100_000,
            created_at: NOW,
            created_height: 501,
            messages: vec![TlvRecord::new(65537, vec![0, 0])],
        })
    }

    fn canceled(channel: u32, htlc_index: u64) -> InvoiceEvent {
        InvoiceEvent::HtlcCanceled {
            channel_id: ChannelId::new(443, channel, 0),
            htlc_index,
        }
    }

    /// Apply an event, committing only if it changed something.
    fn apply(invoice: Invoice, event: &InvoiceEvent) -> Invoice {
        match invoice.check_event(event, NOW) {
            Ok(Transition::Changed(new)) => new,
            Ok(Transition::Unchanged(_)) | Err(_) => invoice,
        }
    }

    fn changed(transition: Result<Transition, NodeApiError>) -> Invoice {
        match transition.unwrap() {
            Transition::Changed(invoice) => invoice,
            Transition::Unchanged(why) => panic!("Unexpectedly unchanged: {why}"),
        }
    }

    #[test]
    fn state_json_backwards_compat() {
        let expected_ser = r#"["open","held","canceled","confirmed"]"#;
        roundtrip::json_unit_enum_backwards_compat::<InvoiceState>(
            expected_ser,
        );
        let expected_ser = r#"["held","canceled","confirmed"]"#;
        roundtrip::json_unit_enum_backwards_compat::<HtlcState>(expected_ser);
    }

    #[test]
    fn accept_then_settle() {
        let invoice = apply(open_invoice(), &accepted(1, 0));
        assert_eq!(invoice.state, InvoiceState::Held);
        assert_eq!(invoice.revision, 1);
        let htlc = &invoice.htlcs[0];
        assert_eq!(htlc.channel_id.to_string(), "443x1x0");
        assert_eq!(htlc.pending_index, Some(0));
        assert_eq!(htlc.tokens(), 100);

        let invoice = changed(invoice.check_settle(&secret(), NOW));
        assert_eq!(invoice.state, InvoiceState::Confirmed);
        assert_eq!(invoice.secret, Some(secret()));
        assert_eq!(invoice.confirmed_at, Some(NOW));
        let htlc = &invoice.htlcs[0];
        assert_eq!(htlc.state, HtlcState::Confirmed);
        assert_eq!(htlc.pending_index, None);
        assert!(invoice.is_resolved());

        // Settling again is a no-op.
        let again = invoice.check_settle(&secret(), NOW).unwrap();
        assert!(matches!(again, Transition::Unchanged(_)));
    }

    #[test]
    fn cancel_clears_pending_htlcs() {
        let invoice = apply(open_invoice(), &accepted(1, 0));
        let invoice = apply(invoice, &accepted(2, 0));
        assert_eq!(invoice.held_mtokens(), 200_000);

        let invoice = changed(invoice.check_cancel(NOW));
        assert_eq!(invoice.state, InvoiceState::Canceled);
        assert!(invoice.htlcs.iter().all(|htlc| {
            htlc.state == HtlcState::Canceled && htlc.pending_index.is_none()
        }));

        // Cancel is idempotent, settle is now rejected.
        let again = invoice.check_cancel(NOW).unwrap();
        assert!(matches!(again, Transition::Unchanged(_)));
        let err = invoice.check_settle(&secret(), NOW).unwrap_err();
        assert_eq!(err.reason(), "InvalidState");
    }

    #[test]
    fn mismatched_secret_is_rejected_in_every_state() {
        let wrong = PaymentSecret::new([7; 32]);
        let open = open_invoice();
        let held = apply(open.clone(), &accepted(1, 0));
        let confirmed = changed(held.check_settle(&secret(), NOW));
        let canceled = changed(open.check_cancel(NOW));

        for invoice in [open, held, confirmed, canceled] {
            let err = invoice.check_settle(&wrong, NOW).unwrap_err();
            assert_eq!(err.reason(), "InvalidSecret");
            assert_eq!(err.code(), 400);
        }
    }

    #[test]
    fn cancel_confirmed_is_invalid_state() {
        let confirmed = changed(open_invoice().check_settle(&secret(), NOW));
        let err = confirmed.check_cancel(NOW).unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn held_htlc_cancel_returns_to_open() {
        let invoice = apply(open_invoice(), &accepted(1, 7));
        let invoice = apply(invoice, &canceled(1, 7));
        assert_eq!(invoice.state, InvoiceState::Open);
        assert_eq!(invoice.htlcs[0].state, HtlcState::Canceled);
        assert_eq!(invoice.htlcs[0].canceled_at, Some(NOW));
        assert_eq!(invoice.revision, 2);
    }

    #[test]
    fn duplicate_and_late_events_are_ignored() {
        let invoice = apply(open_invoice(), &accepted(1, 0));
        let dup = invoice.check_event(&accepted(1, 0), NOW).unwrap();
        assert!(matches!(dup, Transition::Unchanged(_)));

        let unknown = invoice.check_event(&canceled(9, 9), NOW).unwrap();
        assert!(matches!(unknown, Transition::Unchanged(_)));

        let confirmed = changed(invoice.check_settle(&secret(), NOW));
        let late = confirmed.check_event(&accepted(2, 0), NOW).unwrap();
        assert!(matches!(late, Transition::Unchanged(_)));
        let late = confirmed.check_event(&canceled(1, 0), NOW).unwrap();
        assert!(matches!(late, Transition::Unchanged(_)));
        let late = confirmed.check_event(&InvoiceEvent::Canceled, NOW).unwrap();
        assert!(matches!(late, Transition::Unchanged(_)));
    }

    /// Arbitrary event sequences never break the invoice's invariants.
    #[test]
    fn invariants_hold_under_any_event_sequence() {
        let event = prop_oneof![
            (0u32..3, 0u64..3).prop_map(|(c, i)| accepted(c, i)),
            (0u32..3, 0u64..3).prop_map(|(c, i)| canceled(c, i)),
            any::<bool>().prop_map(|right| InvoiceEvent::Settled {
                secret: if right { secret() } else { PaymentSecret::new([1; 32]) },
            }),
            proptest::strategy::Just(InvoiceEvent::Canceled),
        ];

        proptest!(|(events in collection::vec(event, 0..16))| {
            let mut invoice = open_invoice();
            let mut terminal_seen = None;

            for event in &events {
                let prev_revision = invoice.revision;
                invoice = apply(invoice, event);
                prop_assert!(invoice.revision >= prev_revision);

                // Terminal states are absorbing.
                if let Some(state) = terminal_seen {
                    prop_assert_eq!(invoice.state, state);
                }
                if invoice.is_terminal() {
                    terminal_seen = Some(invoice.state);
                }

                let held = invoice.held_htlcs().count();
                match invoice.state {
                    InvoiceState::Open => prop_assert_eq!(held, 0),
                    InvoiceState::Held => prop_assert!(held > 0),
                    InvoiceState::Canceled | InvoiceState::Confirmed =>
                        prop_assert_eq!(held, 0),
                }
                prop_assert_eq!(
                    invoice.secret.is_some(),
                    invoice.state == InvoiceState::Confirmed
                );
                for htlc in &invoice.htlcs {
                    prop_assert_eq!(
                        htlc.pending_index.is_some(),
                        htlc.state == HtlcState::Held
                    );
                }
            }
        });
    }
}
