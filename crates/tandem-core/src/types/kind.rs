//! Closed set of replicated and non-replicated entity kinds.
//!
//! The weight of a kind orders writes inside one transaction: a kind is
//! always written after every kind it references, and deleted before them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Registrar,
    PremiumList,
    ReservedList,
    AllocationToken,
    ServerSecret,
    RegistrarContact,
    PremiumEntry,
    Registry,
    Cursor,
    ContactResource,
    HostResource,
    DomainBase,
    DelegationSignerData,
    HistoryEntry,
    BillingOneTime,
    BillingRecurring,
    PollMessage,
    BillingCancellation,
    GracePeriod,
    // Kinds that exist in the primary store only.
    Lock,
    RdeRevision,
    ForeignKeyIndex,
    EppResourceIndex,
    EntityGroupRoot,
    CommitLogManifest,
    CommitLogMutation,
    CommitLogCheckpoint,
}

use EntityKind::*;

impl EntityKind {
    pub const ALL: [EntityKind; 27] = [
        Registrar,
        PremiumList,
        ReservedList,
        AllocationToken,
        ServerSecret,
        RegistrarContact,
        PremiumEntry,
        Registry,
        Cursor,
        ContactResource,
        HostResource,
        DomainBase,
        DelegationSignerData,
        HistoryEntry,
        BillingOneTime,
        BillingRecurring,
        PollMessage,
        BillingCancellation,
        GracePeriod,
        Lock,
        RdeRevision,
        ForeignKeyIndex,
        EppResourceIndex,
        EntityGroupRoot,
        CommitLogManifest,
        CommitLogMutation,
        CommitLogCheckpoint,
    ];

    /// Stable wire name.
    pub fn name(self) -> &'static str {
        match self {
            Registrar => "Registrar",
            PremiumList => "PremiumList",
            ReservedList => "ReservedList",
            AllocationToken => "AllocationToken",
            ServerSecret => "ServerSecret",
            RegistrarContact => "RegistrarContact",
            PremiumEntry => "PremiumEntry",
            Registry => "Registry",
            Cursor => "Cursor",
            ContactResource => "ContactResource",
            HostResource => "HostResource",
            DomainBase => "DomainBase",
            DelegationSignerData => "DelegationSignerData",
            HistoryEntry => "HistoryEntry",
            BillingOneTime => "BillingOneTime",
            BillingRecurring => "BillingRecurring",
            PollMessage => "PollMessage",
            BillingCancellation => "BillingCancellation",
            GracePeriod => "GracePeriod",
            Lock => "Lock",
            RdeRevision => "RdeRevision",
            ForeignKeyIndex => "ForeignKeyIndex",
            EppResourceIndex => "EppResourceIndex",
            EntityGroupRoot => "EntityGroupRoot",
            CommitLogManifest => "CommitLogManifest",
            CommitLogMutation => "CommitLogMutation",
            CommitLogCheckpoint => "CommitLogCheckpoint",
        }
    }

    pub fn from_name(name: &str) -> Option<EntityKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Dependency weight; lower weights are written first.
    pub fn weight(self) -> u32 {
        match self {
            Registrar | PremiumList | ReservedList | AllocationToken | ServerSecret => 0,
            RegistrarContact | PremiumEntry | Registry => 1,
            Cursor => 2,
            ContactResource => 8,
            HostResource => 9,
            DomainBase => 10,
            DelegationSignerData => 11,
            HistoryEntry => 20,
            BillingOneTime | BillingRecurring | PollMessage => 21,
            BillingCancellation => 22,
            GracePeriod => 23,
            Lock | RdeRevision | ForeignKeyIndex | EppResourceIndex | EntityGroupRoot
            | CommitLogManifest | CommitLogMutation | CommitLogCheckpoint => 0,
        }
    }

    /// Whether writes of this kind are copied to the secondary store.
    ///
    /// `Lock` is written to both stores by the application itself; the rest
    /// are bookkeeping of the primary store.
    pub fn is_replicated(self) -> bool {
        !matches!(
            self,
            Lock | RdeRevision
                | ForeignKeyIndex
                | EppResourceIndex
                | EntityGroupRoot
                | CommitLogManifest
                | CommitLogMutation
                | CommitLogCheckpoint
        )
    }

    /// Kinds a row of this kind may hold foreign keys to.
    pub fn references(self) -> &'static [EntityKind] {
        match self {
            RegistrarContact => &[Registrar],
            PremiumEntry => &[PremiumList],
            Registry => &[PremiumList, ReservedList],
            Cursor => &[Registry],
            ContactResource | HostResource => &[Registrar],
            DomainBase => &[
                ContactResource,
                HostResource,
                Registrar,
                Registry,
                AllocationToken,
            ],
            DelegationSignerData => &[DomainBase],
            HistoryEntry => &[DomainBase, ContactResource, HostResource, Registrar],
            BillingOneTime => &[DomainBase, HistoryEntry, Registrar, AllocationToken],
            BillingRecurring => &[DomainBase, HistoryEntry, Registrar],
            PollMessage => &[HistoryEntry, Registrar],
            BillingCancellation => &[BillingOneTime, BillingRecurring, HistoryEntry],
            GracePeriod => &[DomainBase, BillingOneTime, BillingRecurring],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
