use std::path::Path;
use std::time::{Duration, Instant};

use redb::{Database, ReadableTable, TableDefinition};

use crate::game::dragon::OnlineUrDragon;
use crate::game::pawn::PawnRewards;
use crate::game::unix_now;
use crate::persistence::session::Session;

const DRAGON_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dragon");
const SESSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("session");
const PAWN_REWARD_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pawnreward");

const DRAGON_KEY: &str = "dragon";

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotInitialized,
    NotFound(String),
    Serialization(String),
    Storage(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotInitialized => write!(f, "database not initialized"),
            StoreError::NotFound(what) => write!(f, "{} not found", what),
            StoreError::Serialization(reason) => {
                write!(f, "record serialization failed: {}", reason)
            }
            StoreError::Storage(reason) => write!(f, "storage failed: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::TableDoesNotExist(_) => StoreError::NotInitialized,
            other => StoreError::Storage(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// The single-file store behind the whole service: the dragon singleton,
/// login sessions, and per-player pawn rewards, each in its own table with
/// one transaction per operation.
pub struct Store {
    db: Database,
}

impl Store {
    /// Opens (or creates) the database file. A concurrent holder of the
    /// file lock is waited out until a fixed deadline so a second instance
    /// fails fast instead of hanging forever.
    pub fn open(path: &Path) -> Result<Store, StoreError> {
        let deadline = Instant::now() + OPEN_TIMEOUT;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::Storage(format!(
                            "open {} failed: {}",
                            path.display(),
                            err
                        )));
                    }
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        };

        let store = Store { db };
        store.init()?;
        Ok(store)
    }

    /// Creates the tables and seeds the first dragon generation on a fresh
    /// file.
    fn init(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut dragon_table = txn.open_table(DRAGON_TABLE)?;
            txn.open_table(SESSION_TABLE)?;
            txn.open_table(PAWN_REWARD_TABLE)?;

            if dragon_table.get(DRAGON_KEY)?.is_none() {
                let dragon = OnlineUrDragon::default().next_generation();
                let value = encode(&dragon)?;
                dragon_table.insert(DRAGON_KEY, value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_dragon(&self) -> Result<OnlineUrDragon, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DRAGON_TABLE)?;
        let value = table
            .get(DRAGON_KEY)?
            .ok_or_else(|| StoreError::NotFound("dragon".to_string()))?;
        decode(value.value())
    }

    pub fn put_dragon(&self, dragon: &OnlineUrDragon) -> Result<(), StoreError> {
        let value = encode(dragon)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DRAGON_TABLE)?;
            table.insert(DRAGON_KEY, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Fetches a session, dropping it when its expiration has passed.
    pub fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        let session: Session = {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SESSION_TABLE)?;
            let value = table
                .get(id)?
                .ok_or_else(|| StoreError::NotFound(format!("session '{}'", id)))?;
            decode(value.value())?
        };

        if session.is_expired(unix_now()) {
            self.delete_session(id)?;
            return Err(StoreError::NotFound(format!("session '{}'", id)));
        }

        Ok(session)
    }

    pub fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        let value = encode(session)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SESSION_TABLE)?;
            table.insert(session.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SESSION_TABLE)?;
            table.remove(id)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// A missing inbox is a normal condition, not an error.
    pub fn get_pawn_rewards(&self, user_id: u64) -> Result<Option<PawnRewards>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PAWN_REWARD_TABLE)?;
        let key = user_id.to_be_bytes();
        match table.get(key.as_slice())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_pawn_rewards(&self, rewards: &PawnRewards) -> Result<(), StoreError> {
        let value = encode(rewards)?;
        let key = rewards.pawn_user_id.to_be_bytes();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PAWN_REWARD_TABLE)?;
            table.insert(key.as_slice(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(value: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(value).map_err(|err| StoreError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::dragon::HEART_HEALTH;
    use crate::game::pawn::PawnReward;

    struct TempStore {
        path: std::path::PathBuf,
    }

    impl TempStore {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "urdragon-store-test-{}-{}.redb",
                std::process::id(),
                name
            ));
            let _ = std::fs::remove_file(&path);
            Self { path }
        }

        fn open(&self) -> Store {
            Store::open(&self.path).expect("open store")
        }
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn first_open_seeds_the_dragon() {
        let temp = TempStore::new("seed");
        let store = temp.open();

        let dragon = store.get_dragon().expect("dragon");
        assert_eq!(dragon.generation, 1);
        assert_eq!(dragon.defense, 901);
        assert!(dragon.spawn_time.is_some());
        assert!(dragon.kill_time.is_none());
        for heart in dragon.hearts.iter() {
            assert_eq!(heart.health, HEART_HEALTH);
        }
    }

    #[test]
    fn dragon_survives_reopen() {
        let temp = TempStore::new("reopen");
        {
            let store = temp.open();
            let mut dragon = store.get_dragon().expect("dragon");
            dragon.generation = 5;
            dragon.fight_count = 77;
            store.put_dragon(&dragon).expect("put");
        }

        let store = temp.open();
        let dragon = store.get_dragon().expect("dragon");
        assert_eq!(dragon.generation, 5);
        assert_eq!(dragon.fight_count, 77);
    }

    #[test]
    fn session_roundtrip_and_missing() {
        let temp = TempStore::new("session");
        let store = temp.open();

        let session = Session::new("steam-user", 300);
        store.put_session(&session).expect("put");
        assert_eq!(store.get_session(&session.id).expect("get"), session);

        store.delete_session(&session.id).expect("delete");
        assert!(matches!(
            store.get_session(&session.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn expired_session_fails_on_read() {
        let temp = TempStore::new("expired");
        let store = temp.open();

        let mut session = Session::new("steam-user", 300);
        session.created_at = 1000;
        session.expiration = 1001;
        store.put_session(&session).expect("put");

        assert!(matches!(
            store.get_session(&session.id),
            Err(StoreError::NotFound(_))
        ));
        // and it is gone afterwards, not just hidden
        assert!(matches!(
            store.get_session(&session.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn pawn_rewards_absent_is_ok() {
        let temp = TempStore::new("pawn-absent");
        let store = temp.open();
        assert!(store.get_pawn_rewards(42).expect("get").is_none());
    }

    #[test]
    fn pawn_rewards_roundtrip() {
        let temp = TempStore::new("pawn");
        let store = temp.open();

        let mut rewards = PawnRewards::new(0x1234_5678_9876);
        rewards.revision = 10;
        rewards.rewards[15] = Some(PawnReward {
            user_id: 0xEEEE_EEEE_EEEE,
            item_refs: vec![5],
        });

        store.put_pawn_rewards(&rewards).expect("put");
        let loaded = store
            .get_pawn_rewards(rewards.pawn_user_id)
            .expect("get")
            .expect("present");
        assert_eq!(loaded, rewards);
    }
}
