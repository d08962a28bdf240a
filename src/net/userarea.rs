use std::io::{Read, Write};

use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::Blowfish;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use crate::game::pawn::{PawnReward, PawnRewards, REWARD_ITEM_REF_MAX, REWARD_SLOT_COUNT};
use crate::net::packet::{PacketReader, PacketWriter};
use crate::net::ProtocolError;

pub const SLOT_COUNT: usize = REWARD_SLOT_COUNT;
pub const ITEM_COUNT: usize = REWARD_ITEM_REF_MAX;

/// The blob is padded to this exact size on the wire and at rest.
pub const USER_AREA_BLOB_LENGTH: usize = 2048;

const USER_AREA_TYPE: u32 = 0x12122700;
const USER_AREA_KEY: &[u8] = b"nokupak amugod uznogarod";

const BLOCK_LENGTH: usize = 8;
const PAD_BYTE: u8 = 0xDD;
const FREE_ITEM: u32 = 0xFFFF_FFFF;

const SLOT_USED: u8 = 0;
const SLOT_FREE: u8 = 1;

const ITEM_LENGTH: usize = 4;
const SLOT_LENGTH: usize = 13 + ITEM_COUNT * ITEM_LENGTH;
const AREA_HEADER_LENGTH: usize = 8;
const AREA_LENGTH: usize = AREA_HEADER_LENGTH + SLOT_COUNT * SLOT_LENGTH;

const COMPRESSION_HEADER_LENGTH: usize = 32;
const ENCRYPTION_HEADER_LENGTH: usize = 8;

/// One reward slot as it sits in the fixed layout. Free slots carry the
/// free marker and all-ones item refs, matching what the client writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAreaSlot {
    pub unknown: u8,
    pub items: [u32; ITEM_COUNT],
    pub items_count: u32,
    pub user: u64,
}

impl UserAreaSlot {
    fn free() -> Self {
        Self {
            unknown: SLOT_FREE,
            items: [FREE_ITEM; ITEM_COUNT],
            items_count: 0,
            user: 0,
        }
    }
}

/// The decrypted, decompressed reward area exactly as the client lays it
/// out. Field names follow what could be observed of the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserArea {
    pub unknown: u32,
    pub unknown_count: u32,
    pub slots: [UserAreaSlot; SLOT_COUNT],
}

impl Default for UserArea {
    fn default() -> Self {
        Self {
            unknown: 0,
            unknown_count: 0,
            slots: [UserAreaSlot::free(); SLOT_COUNT],
        }
    }
}

fn invalid_blob(reason: &str) -> ProtocolError {
    ProtocolError::InvalidBlob(reason.to_string())
}

/// Serialize, compress, encrypt and pad an area into the fixed-size blob.
pub fn write_user_area(area: &UserArea) -> Result<Vec<u8>, ProtocolError> {
    let data = serialize_user_area(area);
    let data = compress_user_area(&data)?;
    let data = encrypt_user_area(&data)?;
    pad_user_area(data)
}

/// Inverse of [`write_user_area`]. Empty input stands for a missing area.
pub fn read_user_area(data: &[u8]) -> Result<Option<UserArea>, ProtocolError> {
    if data.is_empty() {
        return Ok(None);
    }

    let data = decrypt_user_area(data)?;
    let data = decompress_user_area(&data)?;
    let area = parse_user_area(&data)?;

    Ok(Some(area))
}

pub fn pawn_rewards_to_user_area(rewards: &PawnRewards) -> UserArea {
    let mut area = UserArea {
        unknown_count: rewards.revision as u32,
        ..UserArea::default()
    };

    for (slot, reward) in area.slots.iter_mut().zip(rewards.rewards.iter()) {
        let Some(reward) = reward else {
            continue;
        };

        slot.unknown = SLOT_USED;
        slot.user = reward.user_id;
        slot.items_count = reward.item_refs.len().min(ITEM_COUNT) as u32;
        for (item, item_ref) in slot.items.iter_mut().zip(reward.item_refs.iter()) {
            *item = *item_ref as u32;
        }
    }

    area
}

pub fn user_area_to_pawn_rewards(pawn_user_id: u64, area: &UserArea) -> PawnRewards {
    let mut rewards = PawnRewards::new(pawn_user_id);
    rewards.revision = area.unknown_count as i32;

    for (reward, slot) in rewards.rewards.iter_mut().zip(area.slots.iter()) {
        if slot.unknown != SLOT_USED {
            continue;
        }

        let count = (slot.items_count as usize).min(ITEM_COUNT);
        *reward = Some(PawnReward {
            user_id: slot.user,
            item_refs: slot.items[..count].iter().map(|item| *item as i32).collect(),
        });
    }

    rewards
}

fn serialize_user_area(area: &UserArea) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(AREA_LENGTH);
    writer.write_u32_be(area.unknown);
    writer.write_u32_be(area.unknown_count);

    for slot in area.slots.iter() {
        writer.write_u8(slot.unknown);
        for item in slot.items.iter() {
            writer.write_u32_be(*item);
        }
        writer.write_u32_be(slot.items_count);
        writer.write_u64_be(slot.user);
    }

    writer.into_vec()
}

fn parse_user_area(data: &[u8]) -> Result<UserArea, ProtocolError> {
    if data.len() < AREA_LENGTH {
        return Err(invalid_blob("insufficient data to parse"));
    }

    let mut reader = PacketReader::new(data);
    let mut area = UserArea::default();
    area.unknown = reader.read_u32_be().ok_or_else(|| invalid_blob("truncated"))?;
    area.unknown_count = reader.read_u32_be().ok_or_else(|| invalid_blob("truncated"))?;

    for slot in area.slots.iter_mut() {
        slot.unknown = reader.read_u8().ok_or_else(|| invalid_blob("truncated"))?;
        for item in slot.items.iter_mut() {
            *item = reader.read_u32_be().ok_or_else(|| invalid_blob("truncated"))?;
        }
        slot.items_count = reader.read_u32_be().ok_or_else(|| invalid_blob("truncated"))?;
        slot.user = reader.read_u64_be().ok_or_else(|| invalid_blob("truncated"))?;
    }

    Ok(area)
}

/// Reverses the byte order of every aligned 4-byte group. The cipher and
/// digest headers both store their words this way.
fn swap_u32_endianness(data: &mut [u8]) {
    for group in data.chunks_exact_mut(4) {
        group.swap(0, 3);
        group.swap(1, 2);
    }
}

fn compress_user_area(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| ProtocolError::InvalidBlob(format!("compression failed: {}", err)))
        .map(|compressed| {
            let digest = Sha1::digest(&compressed);

            let mut out = Vec::with_capacity(COMPRESSION_HEADER_LENGTH + compressed.len());
            out.extend_from_slice(&USER_AREA_TYPE.to_le_bytes());
            out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&digest);
            swap_u32_endianness(&mut out[12..32]);
            out.extend_from_slice(&compressed);
            out
        })
}

fn decompress_user_area(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if data.len() < COMPRESSION_HEADER_LENGTH {
        return Err(invalid_blob("insufficient data to decompress"));
    }

    let compressed_length = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let plain_length = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let mut stored_hash = [0u8; 20];
    stored_hash.copy_from_slice(&data[12..32]);
    swap_u32_endianness(&mut stored_hash);

    let compressed = &data[COMPRESSION_HEADER_LENGTH..];
    if compressed.len() < compressed_length {
        return Err(invalid_blob("insufficient data to decompress"));
    }

    let digest = Sha1::digest(compressed);
    if digest.as_slice() != stored_hash.as_slice() {
        return Err(invalid_blob("hash mismatch"));
    }

    let mut plain = Vec::with_capacity(plain_length);
    ZlibDecoder::new(compressed)
        .read_to_end(&mut plain)
        .map_err(|err| ProtocolError::InvalidBlob(format!("decompression failed: {}", err)))?;

    if plain.len() != plain_length {
        return Err(invalid_blob("decompressed size mismatch"));
    }

    Ok(plain)
}

fn new_cipher() -> Result<Blowfish, ProtocolError> {
    Blowfish::new_from_slice(USER_AREA_KEY).map_err(|_| invalid_blob("invalid cipher key"))
}

fn encrypt_user_area(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let cipher = new_cipher()?;

    let mut encrypted = Vec::with_capacity(ENCRYPTION_HEADER_LENGTH + data.len() + BLOCK_LENGTH);
    encrypted.extend_from_slice(&USER_AREA_TYPE.to_le_bytes());
    encrypted.extend_from_slice(&(data.len() as u32).to_le_bytes());
    encrypted.extend_from_slice(data);
    let padding = (BLOCK_LENGTH - data.len() % BLOCK_LENGTH) % BLOCK_LENGTH;
    encrypted.resize(encrypted.len() + padding, 0);

    for block in encrypted[ENCRYPTION_HEADER_LENGTH..].chunks_exact_mut(BLOCK_LENGTH) {
        swap_u32_endianness(block);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        swap_u32_endianness(block);
    }

    Ok(encrypted)
}

fn decrypt_user_area(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if data.len() < ENCRYPTION_HEADER_LENGTH {
        return Err(invalid_blob("insufficient data to decrypt"));
    }

    let length = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if data.len() - ENCRYPTION_HEADER_LENGTH < length {
        return Err(invalid_blob("insufficient data to decrypt"));
    }

    let cipher = new_cipher()?;

    let mut decrypted = data[ENCRYPTION_HEADER_LENGTH..].to_vec();
    let padding = (BLOCK_LENGTH - decrypted.len() % BLOCK_LENGTH) % BLOCK_LENGTH;
    decrypted.resize(decrypted.len() + padding, 0);

    for block in decrypted.chunks_exact_mut(BLOCK_LENGTH) {
        swap_u32_endianness(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        swap_u32_endianness(block);
    }

    decrypted.truncate(length);
    Ok(decrypted)
}

fn pad_user_area(mut data: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
    if data.len() > USER_AREA_BLOB_LENGTH {
        return Err(invalid_blob("user area exceeds max size"));
    }

    data.resize(USER_AREA_BLOB_LENGTH, PAD_BYTE);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_next(state: &mut u64) -> u32 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (*state >> 32) as u32
    }

    fn sample_area() -> UserArea {
        let mut area = UserArea::default();
        area.unknown_count = 7;

        area.slots[5] = UserAreaSlot {
            unknown: SLOT_USED,
            items: {
                let mut items = [FREE_ITEM; ITEM_COUNT];
                items[0] = 26;
                items
            },
            items_count: 1,
            user: 76561198028565520,
        };

        area.slots[99] = UserAreaSlot {
            unknown: SLOT_USED,
            items: [3; ITEM_COUNT],
            items_count: ITEM_COUNT as u32,
            user: 0xEEEE_EEEE_EEEE,
        };

        area
    }

    #[test]
    fn serialized_layout_has_fixed_length() {
        let data = serialize_user_area(&sample_area());
        assert_eq!(data.len(), AREA_LENGTH);
        assert_eq!(AREA_LENGTH, 5308);
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let area = sample_area();
        let data = serialize_user_area(&area);
        let parsed = parse_user_area(&data).expect("parse");
        assert_eq!(parsed, area);
    }

    #[test]
    fn blob_roundtrip_preserves_area() {
        let area = sample_area();
        let blob = write_user_area(&area).expect("write");
        assert_eq!(blob.len(), USER_AREA_BLOB_LENGTH);

        let decoded = read_user_area(&blob).expect("read").expect("area");
        assert_eq!(decoded, area);
    }

    #[test]
    fn empty_input_reads_as_missing_area() {
        assert!(read_user_area(&[]).expect("read").is_none());
    }

    #[test]
    fn pad_bytes_fill_the_blob_tail() {
        let blob = write_user_area(&UserArea::default()).expect("write");
        assert_eq!(blob.len(), USER_AREA_BLOB_LENGTH);
        assert_eq!(*blob.last().expect("tail"), PAD_BYTE);
    }

    #[test]
    fn incompressible_area_exceeds_blob_size() {
        let mut state = 0x5eed_0000_0000_0001u64;
        let mut area = UserArea::default();
        for slot in area.slots.iter_mut() {
            slot.unknown = SLOT_USED;
            slot.items_count = ITEM_COUNT as u32;
            slot.user = ((lcg_next(&mut state) as u64) << 32) | lcg_next(&mut state) as u64;
            for item in slot.items.iter_mut() {
                *item = lcg_next(&mut state);
            }
        }

        match write_user_area(&area) {
            Err(ProtocolError::InvalidBlob(reason)) => {
                assert!(reason.contains("max size"));
            }
            other => panic!("expected invalid blob error, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_digest_is_rejected() {
        let mut blob = write_user_area(&sample_area()).expect("write");
        // flip one bit inside the compression header's digest
        blob[ENCRYPTION_HEADER_LENGTH + 12] ^= 0x01;

        match read_user_area(&blob) {
            Err(ProtocolError::InvalidBlob(reason)) => {
                assert!(reason.contains("hash mismatch"));
            }
            other => panic!("expected invalid blob error, got {:?}", other),
        }
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = write_user_area(&sample_area()).expect("write");
        assert!(read_user_area(&blob[..4]).is_err());
    }

    #[test]
    fn swap_reverses_aligned_groups() {
        let mut data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_u32_endianness(&mut data);
        assert_eq!(data, [4, 3, 2, 1, 8, 7, 6, 5]);
        swap_u32_endianness(&mut data);
        assert_eq!(data, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn rewards_mapping_roundtrip() {
        let mut rewards = PawnRewards::new(0x1234_5678_9876);
        rewards.revision = 10;
        rewards.rewards[15] = Some(PawnReward {
            user_id: 0xEEEE_EEEE_EEEE,
            item_refs: vec![5],
        });

        let area = pawn_rewards_to_user_area(&rewards);
        assert_eq!(area.unknown_count, 10);
        assert_eq!(area.slots[15].unknown, SLOT_USED);
        assert_eq!(area.slots[15].items_count, 1);
        assert_eq!(area.slots[15].items[0], 5);
        assert_eq!(area.slots[15].items[1], FREE_ITEM);
        assert_eq!(area.slots[0].unknown, SLOT_FREE);

        let mapped = user_area_to_pawn_rewards(rewards.pawn_user_id, &area);
        assert_eq!(mapped, rewards);
    }

    #[test]
    fn free_slots_map_to_empty_rewards() {
        let rewards = user_area_to_pawn_rewards(1, &UserArea::default());
        assert_eq!(rewards.rewards.len(), SLOT_COUNT);
        assert!(rewards.rewards.iter().all(|slot| slot.is_none()));
    }
}
