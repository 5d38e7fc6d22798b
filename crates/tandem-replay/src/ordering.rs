//! Write order inside one transaction.
//!
//! Operations on non-replicated kinds are dropped. Mutations come first,
//! stably sorted by ascending kind weight so referenced rows exist before
//! the rows pointing at them. Deletions follow all mutations, stably sorted
//! by descending weight so referencing rows go before the rows they point at.
//! Nothing is ever reordered across transactions.

use tandem_core::types::{Operation, Transaction};

pub fn order_for_replay(tx: &Transaction) -> Vec<&Operation> {
    let (mut mutations, mut deletions): (Vec<&Operation>, Vec<&Operation>) = tx
        .operations
        .iter()
        .filter(|op| op.kind().is_replicated())
        .partition(|op| !op.is_deletion());

    mutations.sort_by_key(|op| op.kind().weight());
    deletions.sort_by_key(|op| std::cmp::Reverse(op.kind().weight()));

    mutations.extend(deletions);
    mutations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tandem_core::types::{EntityKind, EntityPayload};

    fn tx() -> Transaction {
        Transaction::new(Utc.timestamp_millis_opt(1_000).unwrap(), 1)
    }

    fn ids(ops: &[&Operation]) -> Vec<String> {
        ops.iter()
            .map(|op| {
                let tag = if op.is_deletion() { "-" } else { "+" };
                format!("{tag}{}", op.key().id)
            })
            .collect()
    }

    #[test]
    fn referenced_kinds_are_written_first() {
        let tx = tx()
            .add_update(EntityKind::DomainBase, "domain", EntityPayload::v1(json!({})))
            .add_update(EntityKind::ContactResource, "contact", EntityPayload::v1(json!({})))
            .add_update(EntityKind::Registrar, "registrar", EntityPayload::v1(json!({})));
        assert_eq!(
            ids(&order_for_replay(&tx)),
            vec!["+registrar", "+contact", "+domain"]
        );
    }

    #[test]
    fn equal_weights_keep_source_order() {
        let tx = tx()
            .add_update(EntityKind::PollMessage, "p2", EntityPayload::v1(json!({})))
            .add_update(EntityKind::BillingOneTime, "b1", EntityPayload::v1(json!({})))
            .add_update(EntityKind::PollMessage, "p1", EntityPayload::v1(json!({})));
        assert_eq!(ids(&order_for_replay(&tx)), vec!["+p2", "+b1", "+p1"]);
    }

    #[test]
    fn deletions_follow_all_mutations() {
        let tx = tx()
            .add_delete(EntityKind::Registrar, "old")
            .add_update(EntityKind::GracePeriod, "gp", EntityPayload::v1(json!({})))
            .add_delete(EntityKind::DomainBase, "gone")
            .add_update(EntityKind::HostResource, "h", EntityPayload::v1(json!({})));
        assert_eq!(
            ids(&order_for_replay(&tx)),
            vec!["+h", "+gp", "-gone", "-old"]
        );
    }

    #[test]
    fn create_then_delete_in_one_commit_ends_deleted() {
        let tx = tx()
            .add_update(EntityKind::HostResource, "h", EntityPayload::v1(json!({})))
            .add_delete(EntityKind::HostResource, "h");
        assert_eq!(ids(&order_for_replay(&tx)), vec!["+h", "-h"]);
    }

    #[test]
    fn non_replicated_kinds_are_dropped() {
        let tx = tx()
            .add_update(EntityKind::CommitLogManifest, "m", EntityPayload::v1(json!({})))
            .add_update(EntityKind::Registrar, "r", EntityPayload::v1(json!({})))
            .add_delete(EntityKind::ForeignKeyIndex, "f")
            .add_update(EntityKind::Lock, "l", EntityPayload::v1(json!({})));
        assert_eq!(ids(&order_for_replay(&tx)), vec!["+r"]);
    }
}
