use serde::{Deserialize, Serialize};

use crate::game::unix_now;

pub const HEART_COUNT: usize = 30;
pub const HEART_HEALTH: u32 = 10_000_000;
pub const PAWN_USER_ID_COUNT: usize = 3;
pub const DEFENSE_MAX: u32 = 100_000;

pub const USED_PROPERTY_COUNT: usize = 43;
pub const MAX_PROPERTY_INDEX: u8 = 63;

const HEART_PAIR_COUNT: u8 = (HEART_COUNT / 2) as u8;
const HEART_HEALTH_INDEX_START: u8 = 1;
const HEART_HEALTH_INDEX_END: u8 = HEART_HEALTH_INDEX_START + HEART_PAIR_COUNT;
const HEART_MAX_HEALTH_INDEX_START: u8 = HEART_HEALTH_INDEX_END;
const HEART_MAX_HEALTH_INDEX_END: u8 = HEART_MAX_HEALTH_INDEX_START + HEART_PAIR_COUNT;
const USER_ID_INDEX_START: u8 = 35;
const USER_ID_INDEX_END: u8 = USER_ID_INDEX_START + (PAWN_USER_ID_COUNT * 2) as u8;

/// Indexed triple used as the dragon's wire representation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub index: u8,
    pub value1: u32,
    pub value2: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyIndexError {
    pub index: u8,
}

impl std::fmt::Display for PropertyIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid property index {}", self.index)
    }
}

impl std::error::Error for PropertyIndexError {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrDragonHeart {
    pub health: u32,
    pub max_health: u32,
}

/// The world boss shared by every connected player. A single instance lives
/// in the database; generations replace it in place.
///
/// Timestamps are unix seconds; `None` encodes as 0 on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUrDragon {
    pub generation: u32,
    pub spawn_time: Option<u64>,
    pub defense: u32,
    pub fight_count: u32,
    pub kill_time: Option<u64>,
    pub kill_count: u32,
    pub hearts: [UrDragonHeart; HEART_COUNT],
    pub pawn_user_ids: [u64; PAWN_USER_ID_COUNT],
}

pub fn all_property_indices() -> Vec<u8> {
    (0..USED_PROPERTY_COUNT as u8).collect()
}

impl OnlineUrDragon {
    /// Spawns the successor generation: hearts back to full, spawn time now,
    /// pawn user ids carried over. Defense follows the armor curve until it
    /// reaches the cap.
    pub fn next_generation(&self) -> OnlineUrDragon {
        let mut next = OnlineUrDragon {
            generation: self.generation + 1,
            spawn_time: Some(unix_now()),
            ..OnlineUrDragon::default()
        };

        let mut defense = self.defense;
        if defense < DEFENSE_MAX {
            // reaches max defense in 100 generations
            defense = (900 * next.generation + next.generation * next.generation).min(DEFENSE_MAX);
        }
        next.defense = defense;

        for heart in next.hearts.iter_mut() {
            heart.health = HEART_HEALTH;
            heart.max_health = HEART_HEALTH;
        }

        next.pawn_user_ids = self.pawn_user_ids;

        next
    }

    pub fn properties(&self) -> Vec<Property> {
        let mut props: Vec<Property> = (0..USED_PROPERTY_COUNT as u8)
            .map(|index| Property {
                index,
                ..Property::default()
            })
            .collect();

        props[0].value2 = self.generation;

        let mut health_index = HEART_HEALTH_INDEX_START as usize;
        let mut max_health_index = HEART_MAX_HEALTH_INDEX_START as usize;
        for (i, heart) in self.hearts.iter().enumerate() {
            if i % 2 == 0 {
                props[health_index].value1 = heart.health;
                props[max_health_index].value1 = heart.max_health;
            } else {
                props[health_index].value2 = heart.health;
                props[max_health_index].value2 = heart.max_health;
                health_index += 1;
                max_health_index += 1;
            }
        }

        props[31].value2 = self.fight_count;
        if let Some(kill_time) = self.kill_time {
            props[32].value2 = kill_time as u32;
        }
        props[33].value2 = self.kill_count;
        // index 34 is not used

        for (i, user_id) in self.pawn_user_ids.iter().enumerate() {
            let prop = &mut props[USER_ID_INDEX_START as usize + i * 2];
            prop.value1 = (user_id >> 32) as u32;
            prop.value2 = *user_id as u32;
            // the odd index in between is not used
        }

        props[41].value2 = self.defense;

        if let Some(spawn_time) = self.spawn_time {
            props[42].value2 = spawn_time as u32;
        }

        props
    }

    /// Projects the dragon onto the requested indices, preserving their order.
    pub fn properties_filtered(
        &self,
        index_filter: &[u8],
    ) -> Result<Vec<Property>, PropertyIndexError> {
        let props = self.properties();
        let max_index = (props.len() - 1) as u8;

        let mut filtered = Vec::with_capacity(index_filter.len());
        for &index in index_filter {
            if index > max_index {
                return Err(PropertyIndexError { index });
            }
            filtered.push(props[index as usize]);
        }

        Ok(filtered)
    }

    /// Overwrites fields addressed by the submitted properties. Once every
    /// heart is down and no kill time was recorded yet, the kill time is
    /// stamped with the current moment.
    pub fn set_properties(&mut self, props: &[Property]) -> Result<(), PropertyIndexError> {
        for prop in props {
            match prop.index {
                0 => self.generation = prop.value2,
                index if (HEART_HEALTH_INDEX_START..HEART_HEALTH_INDEX_END).contains(&index) => {
                    let pair = (index - HEART_HEALTH_INDEX_START) as usize * 2;
                    self.hearts[pair].health = prop.value1;
                    self.hearts[pair + 1].health = prop.value2;
                }
                index
                    if (HEART_MAX_HEALTH_INDEX_START..HEART_MAX_HEALTH_INDEX_END)
                        .contains(&index) =>
                {
                    let pair = (index - HEART_MAX_HEALTH_INDEX_START) as usize * 2;
                    self.hearts[pair].max_health = prop.value1;
                    self.hearts[pair + 1].max_health = prop.value2;
                }
                31 => self.fight_count = prop.value2,
                32 => self.kill_time = nillable_time(prop.value2),
                33 => self.kill_count = prop.value2,
                index
                    if (USER_ID_INDEX_START..USER_ID_INDEX_END).contains(&index)
                        && (index - USER_ID_INDEX_START) % 2 == 0 =>
                {
                    let slot = (index - USER_ID_INDEX_START) as usize / 2;
                    self.pawn_user_ids[slot] =
                        (prop.value1 as u64) << 32 | prop.value2 as u64;
                }
                41 => self.defense = prop.value2,
                42 => self.spawn_time = nillable_time(prop.value2),
                index if index > MAX_PROPERTY_INDEX => {
                    return Err(PropertyIndexError { index });
                }
                _ => {}
            }
        }

        if self.kill_time.is_none() {
            let alive = self.hearts.iter().any(|heart| heart.health > 0);
            if !alive {
                self.kill_time = Some(unix_now());
            }
        }

        Ok(())
    }

    /// Accumulates the submitted values into the fight and kill counters;
    /// other indices are accepted without effect. Returns the post-update
    /// projection at the submitted indices.
    pub fn add_properties(
        &mut self,
        props: &[Property],
    ) -> Result<Vec<Property>, PropertyIndexError> {
        let mut indices = Vec::with_capacity(props.len());

        for prop in props {
            match prop.index {
                31 => self.fight_count = self.fight_count.wrapping_add(prop.value2),
                33 => self.kill_count = self.kill_count.wrapping_add(prop.value2),
                _ => {}
            }

            indices.push(prop.index);
        }

        self.properties_filtered(&indices)
    }
}

fn nillable_time(seconds: u32) -> Option<u64> {
    if seconds == 0 {
        None
    } else {
        Some(seconds as u64)
    }
}
