use serde::{Deserialize, Serialize};

pub const REWARD_SLOT_COUNT: usize = 100;
pub const REWARD_ITEM_REF_MAX: usize = 10;

/// A single reward left behind by a hired pawn: who hired it and which items
/// it brought back.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnReward {
    pub user_id: u64,
    pub item_refs: Vec<i32>,
}

/// The per-player reward inbox. The slot array always spans the full
/// capacity; free slots are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnRewards {
    pub pawn_user_id: u64,
    pub revision: i32,
    pub rewards: Vec<Option<PawnReward>>,
}

impl PawnRewards {
    pub fn new(pawn_user_id: u64) -> Self {
        Self {
            pawn_user_id,
            revision: 0,
            rewards: vec![None; REWARD_SLOT_COUNT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_inbox_has_only_free_slots() {
        let rewards = PawnRewards::new(7);
        assert_eq!(rewards.pawn_user_id, 7);
        assert_eq!(rewards.rewards.len(), REWARD_SLOT_COUNT);
        assert!(rewards.rewards.iter().all(|slot| slot.is_none()));
    }
}
