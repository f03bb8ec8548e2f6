//! Ledger Store
//! Mission: One sqlite database for mirrored chain data and the cluster
//! partition, with linearizable cluster mutations

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::chain::types::{Address, Block, Exchange, Transaction};
use crate::cluster::partition::{ClusterId, Partition};

const LEDGER_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS blocks (
    number INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    tx_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    hash TEXT PRIMARY KEY,
    block_number INTEGER NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    value REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_txs_to_block
    ON transactions(to_address, block_number);

CREATE INDEX IF NOT EXISTS idx_txs_from
    ON transactions(from_address);

CREATE TABLE IF NOT EXISTS accounts (
    address TEXT PRIMARY KEY,
    cluster_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_accounts_cluster
    ON accounts(cluster_id);

CREATE TABLE IF NOT EXISTS clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS exchanges (
    address TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
"#;

/// An address record as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub cluster: Option<ClusterId>,
}

/// Clustering counters.
#[derive(Debug, Default)]
pub struct ClusterStats {
    pub clusters_created: AtomicU64,
    pub extensions: AtomicU64,
    pub merges: AtomicU64,
    pub noops: AtomicU64,
}

impl ClusterStats {
    pub fn summary(&self) -> String {
        format!(
            "created={}, extended={}, merged={}, noops={}",
            self.clusters_created.load(Ordering::Relaxed),
            self.extensions.load(Ordering::Relaxed),
            self.merges.load(Ordering::Relaxed),
            self.noops.load(Ordering::Relaxed),
        )
    }
}

/// Persistent store for mirrored chain data and the address partition.
///
/// The partition lives in the `accounts.cluster_id` column; all mutating
/// cluster operations go through [`LedgerStore::resolve_scope`], which holds
/// the single connection lock for the duration of one sqlite transaction so
/// concurrent resolver calls serialize instead of racing each other's
/// membership reads.
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
    stats: ClusterStats,
}

impl LedgerStore {
    /// Open or create the store at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open ledger store: {}", db_path))?;
        conn.execute_batch(LEDGER_SCHEMA)?;

        info!(path = %db_path, "ledger store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            stats: ClusterStats::default(),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LEDGER_SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            stats: ClusterStats::default(),
        })
    }

    pub fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // Exchange registry
    // ------------------------------------------------------------------

    pub fn register_exchanges(&self, exchanges: &[Exchange]) -> Result<()> {
        let conn = self.conn.lock();
        for exchange in exchanges {
            conn.execute(
                "INSERT OR REPLACE INTO exchanges (address, name) VALUES (?1, ?2)",
                params![exchange.address.as_str(), exchange.name],
            )?;
        }
        Ok(())
    }

    pub fn exchanges(&self) -> Result<Vec<Exchange>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT address, name FROM exchanges ORDER BY address")?;
        let rows = stmt.query_map([], |row| {
            Ok(Exchange {
                address: Address::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn exchange_addresses(&self) -> Result<HashSet<Address>> {
        Ok(self.exchanges()?.into_iter().map(|e| e.address).collect())
    }

    // ------------------------------------------------------------------
    // Chain data
    // ------------------------------------------------------------------

    /// Persist a batch of blocks, their transactions and the account rows
    /// those transactions touch. Idempotent for re-delivered blocks.
    pub fn insert_blocks(&self, blocks: &[Block]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for block in blocks {
            tx.execute(
                "INSERT OR REPLACE INTO blocks (number, timestamp, tx_count) VALUES (?1, ?2, ?3)",
                params![
                    block.number as i64,
                    block.timestamp,
                    block.transactions.len() as i64
                ],
            )?;

            for transfer in &block.transactions {
                tx.execute(
                    "INSERT OR IGNORE INTO transactions
                     (hash, block_number, from_address, to_address, value)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        transfer.hash,
                        transfer.block_number as i64,
                        transfer.from.as_str(),
                        transfer.to.as_str(),
                        transfer.value,
                    ],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO accounts (address, cluster_id) VALUES (?1, NULL)",
                    params![transfer.from.as_str()],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO accounts (address, cluster_id) VALUES (?1, NULL)",
                    params![transfer.to.as_str()],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn last_block_number(&self) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row("SELECT MAX(number) FROM blocks", [], |row| {
            row.get(0)
        })?;
        Ok(max.map(|n| n as u64))
    }

    /// All persisted transactions from `from_block` on, block order.
    pub fn transactions_from(&self, from_block: u64) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hash, block_number, from_address, to_address, value
             FROM transactions WHERE block_number >= ?1
             ORDER BY block_number, hash",
        )?;
        let rows = stmt.query_map(params![from_block as i64], row_to_transaction)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Filter `txs` down to the ones paying into a registered exchange.
    pub fn txs_to_exchanges(&self, txs: &[Transaction]) -> Result<Vec<Transaction>> {
        let exchanges = self.exchange_addresses()?;
        Ok(txs
            .iter()
            .filter(|t| exchanges.contains(&t.to))
            .cloned()
            .collect())
    }

    /// Backward search for the transaction that funded the deposit address an
    /// exchange-bound transfer was sent from.
    ///
    /// Matches the most recent transaction into `exchange_leg.from` within
    /// `window` blocks whose value is within `ratio` of the exchange-bound
    /// amount.
    pub fn deposit_leg(
        &self,
        exchange_leg: &Transaction,
        window: u64,
        ratio: f64,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hash, block_number, from_address, to_address, value
             FROM transactions
             WHERE to_address = ?1
               AND hash != ?2
               AND block_number <= ?3
               AND block_number + ?4 >= ?3
               AND MAX(value, ?5) <= ?6 * MIN(value, ?5)
             ORDER BY block_number DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(
            params![
                exchange_leg.from.as_str(),
                exchange_leg.hash,
                exchange_leg.block_number as i64,
                window as i64,
                exchange_leg.value,
                ratio,
            ],
            row_to_transaction,
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Cluster operations
    // ------------------------------------------------------------------

    /// Run `f` against a transaction-scoped view of the store.
    ///
    /// The connection lock is held for the whole closure, so the membership
    /// reads and the mutations of one resolver call cannot interleave with
    /// another writer touching the same addresses. On error the transaction
    /// rolls back and no partial mutation survives.
    pub fn resolve_scope<T>(
        &self,
        f: impl FnOnce(&ResolveScope<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&ResolveScope { conn: &*tx });
        match out {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Account> {
        let conn = self.conn.lock();
        account_q(&conn, address)
    }

    pub fn create_cluster(&self) -> Result<ClusterId> {
        let conn = self.conn.lock();
        create_cluster_q(&conn)
    }

    pub fn add_to_cluster(&self, id: ClusterId, addresses: &[Address]) -> Result<()> {
        let conn = self.conn.lock();
        add_to_cluster_q(&conn, id, addresses)
    }

    pub fn merge_clusters(&self, a: ClusterId, b: ClusterId) -> Result<ClusterId> {
        let conn = self.conn.lock();
        merge_clusters_q(&conn, a, b)
    }

    pub fn expand_senders(
        &self,
        deposit: &Address,
        known_sender: &Address,
    ) -> Result<Vec<Address>> {
        let conn = self.conn.lock();
        expand_senders_q(&conn, deposit, known_sender)
    }

    pub fn expand_deposits(
        &self,
        senders: &[Address],
        known_deposit: &Address,
    ) -> Result<Vec<Address>> {
        let conn = self.conn.lock();
        expand_deposits_q(&conn, senders, known_deposit)
    }

    /// Snapshot the current partition: every clustered account, grouped by
    /// cluster id.
    pub fn snapshot_partition(&self) -> Result<Partition> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address, cluster_id FROM accounts WHERE cluster_id IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                Address::new(row.get::<_, String>(0)?),
                row.get::<_, i64>(1)?,
            ))
        })?;
        let assignments = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Partition::from_assignments(assignments))
    }
}

/// Transaction-scoped cluster store view handed to the resolver.
pub struct ResolveScope<'a> {
    conn: &'a Connection,
}

impl ResolveScope<'_> {
    pub fn account(&self, address: &Address) -> Result<Account> {
        account_q(self.conn, address)
    }

    pub fn create_cluster(&self) -> Result<ClusterId> {
        create_cluster_q(self.conn)
    }

    pub fn add_to_cluster(&self, id: ClusterId, addresses: &[Address]) -> Result<()> {
        add_to_cluster_q(self.conn, id, addresses)
    }

    pub fn merge_clusters(&self, a: ClusterId, b: ClusterId) -> Result<ClusterId> {
        merge_clusters_q(self.conn, a, b)
    }

    pub fn expand_senders(&self, deposit: &Address, known_sender: &Address) -> Result<Vec<Address>> {
        expand_senders_q(self.conn, deposit, known_sender)
    }

    pub fn expand_deposits(
        &self,
        senders: &[Address],
        known_deposit: &Address,
    ) -> Result<Vec<Address>> {
        expand_deposits_q(self.conn, senders, known_deposit)
    }
}

// ----------------------------------------------------------------------
// Raw queries, shared between the store facade and resolve scopes
// ----------------------------------------------------------------------

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        hash: row.get(0)?,
        block_number: row.get::<_, i64>(1)? as u64,
        from: Address::new(row.get::<_, String>(2)?),
        to: Address::new(row.get::<_, String>(3)?),
        value: row.get(4)?,
    })
}

fn account_q(conn: &Connection, address: &Address) -> Result<Account> {
    let result = conn.query_row(
        "SELECT cluster_id FROM accounts WHERE address = ?1",
        params![address.as_str()],
        |row| row.get::<_, Option<i64>>(0),
    );
    match result {
        Ok(cluster) => Ok(Account {
            address: address.clone(),
            cluster,
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            bail!("can't resolve account {}", address)
        }
        Err(e) => Err(e.into()),
    }
}

fn create_cluster_q(conn: &Connection) -> Result<ClusterId> {
    conn.execute("INSERT INTO clusters DEFAULT VALUES", [])?;
    Ok(conn.last_insert_rowid())
}

/// Idempotently assign `addresses` to cluster `id`.
///
/// An address already owned by a different cluster is an invariant violation:
/// merges must go through `merge_clusters`, so this fails loudly instead of
/// silently reassigning.
fn add_to_cluster_q(conn: &Connection, id: ClusterId, addresses: &[Address]) -> Result<()> {
    for address in addresses {
        let current = account_q(conn, address)
            .with_context(|| format!("can't add {} to cluster {}", address, id))?;
        match current.cluster {
            None => {
                conn.execute(
                    "UPDATE accounts SET cluster_id = ?1 WHERE address = ?2",
                    params![id, address.as_str()],
                )?;
            }
            Some(existing) if existing == id => {}
            Some(existing) => bail!(
                "partition invariant violated: {} already belongs to cluster {}, refusing to add to {}",
                address,
                existing,
                id
            ),
        }
    }
    Ok(())
}

/// Unify two clusters under one surviving id. `a == b` is a no-op.
///
/// Relabels every member row, so chained merges are transitive regardless of
/// call order.
fn merge_clusters_q(conn: &Connection, a: ClusterId, b: ClusterId) -> Result<ClusterId> {
    if a == b {
        return Ok(a);
    }
    let survivor = a.min(b);
    let absorbed = a.max(b);

    conn.execute(
        "UPDATE accounts SET cluster_id = ?1 WHERE cluster_id = ?2",
        params![survivor, absorbed],
    )?;
    conn.execute("DELETE FROM clusters WHERE id = ?1", params![absorbed])?;

    Ok(survivor)
}

/// Other addresses already observed funding `deposit`, excluding the sender
/// the caller already has and any registered exchange.
fn expand_senders_q(
    conn: &Connection,
    deposit: &Address,
    known_sender: &Address,
) -> Result<Vec<Address>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT from_address FROM transactions
         WHERE to_address = ?1
           AND from_address != ?2
           AND from_address NOT IN (SELECT address FROM exchanges)
         ORDER BY from_address",
    )?;
    let rows = stmt.query_map(params![deposit.as_str(), known_sender.as_str()], |row| {
        Ok(Address::new(row.get::<_, String>(0)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Other deposit addresses already funded by `senders`, excluding the deposit
/// the caller already has.
///
/// "Deposit address" means an address that has itself forwarded funds to a
/// registered exchange.
fn expand_deposits_q(
    conn: &Connection,
    senders: &[Address],
    known_deposit: &Address,
) -> Result<Vec<Address>> {
    if senders.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = senders
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT DISTINCT t.to_address FROM transactions t
         WHERE t.from_address IN ({placeholders})
           AND t.to_address != ?1
           AND EXISTS (
               SELECT 1 FROM transactions e
               JOIN exchanges x ON e.to_address = x.address
               WHERE e.from_address = t.to_address
           )
         ORDER BY t.to_address"
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_iter = std::iter::once(known_deposit.as_str().to_string())
        .chain(senders.iter().map(|s| s.as_str().to_string()));
    let rows = stmt.query_map(params_from_iter(params_iter), |row| {
        Ok(Address::new(row.get::<_, String>(0)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn tx(hash: &str, block: u64, from: &str, to: &str, value: f64) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            block_number: block,
            from: addr(from),
            to: addr(to),
            value,
        }
    }

    fn store_with_txs(txs: Vec<Transaction>) -> LedgerStore {
        let store = LedgerStore::open_memory().unwrap();
        let max_block = txs.iter().map(|t| t.block_number).max().unwrap_or(0);
        let blocks: Vec<Block> = (0..=max_block)
            .map(|n| Block {
                number: n,
                timestamp: n as i64,
                transactions: txs.iter().filter(|t| t.block_number == n).cloned().collect(),
            })
            .collect();
        store.insert_blocks(&blocks).unwrap();
        store
    }

    #[test]
    fn insert_is_idempotent_and_creates_accounts() {
        let store = store_with_txs(vec![tx("0x1", 1, "0xa", "0xb", 5.0)]);
        store
            .insert_blocks(&[Block {
                number: 1,
                timestamp: 1,
                transactions: vec![tx("0x1", 1, "0xa", "0xb", 5.0)],
            }])
            .unwrap();

        assert_eq!(store.last_block_number().unwrap(), Some(1));
        assert_eq!(store.transactions_from(0).unwrap().len(), 1);
        assert_eq!(store.account(&addr("0xa")).unwrap().cluster, None);
        assert_eq!(store.account(&addr("0xb")).unwrap().cluster, None);
    }

    #[test]
    fn unknown_account_lookup_fails() {
        let store = LedgerStore::open_memory().unwrap();
        let err = store.account(&addr("0xnope")).unwrap_err();
        assert!(err.to_string().contains("can't resolve account"));
    }

    #[test]
    fn add_to_cluster_is_idempotent() {
        let store = store_with_txs(vec![tx("0x1", 1, "0xa", "0xb", 5.0)]);
        let id = store.create_cluster().unwrap();

        store.add_to_cluster(id, &[addr("0xa"), addr("0xb")]).unwrap();
        store.add_to_cluster(id, &[addr("0xa")]).unwrap();

        assert_eq!(store.account(&addr("0xa")).unwrap().cluster, Some(id));
        let partition = store.snapshot_partition().unwrap();
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn add_to_foreign_cluster_fails_loudly() {
        let store = store_with_txs(vec![tx("0x1", 1, "0xa", "0xb", 5.0)]);
        let first = store.create_cluster().unwrap();
        let second = store.create_cluster().unwrap();
        store.add_to_cluster(first, &[addr("0xa")]).unwrap();

        let err = store.add_to_cluster(second, &[addr("0xa")]).unwrap_err();
        assert!(err.to_string().contains("partition invariant violated"));

        // State untouched.
        assert_eq!(store.account(&addr("0xa")).unwrap().cluster, Some(first));
    }

    #[test]
    fn merge_same_id_is_noop_and_merges_are_transitive() {
        let store = store_with_txs(vec![
            tx("0x1", 1, "0xa", "0xb", 1.0),
            tx("0x2", 1, "0xc", "0xd", 1.0),
            tx("0x3", 1, "0xe", "0xf", 1.0),
        ]);

        let c1 = store.create_cluster().unwrap();
        let c2 = store.create_cluster().unwrap();
        let c3 = store.create_cluster().unwrap();
        store.add_to_cluster(c1, &[addr("0xa"), addr("0xb")]).unwrap();
        store.add_to_cluster(c2, &[addr("0xc"), addr("0xd")]).unwrap();
        store.add_to_cluster(c3, &[addr("0xe"), addr("0xf")]).unwrap();

        assert_eq!(store.merge_clusters(c1, c1).unwrap(), c1);

        let ab_cd = store.merge_clusters(c2, c1).unwrap();
        let all = store.merge_clusters(c3, ab_cd).unwrap();

        let partition = store.snapshot_partition().unwrap();
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.cluster_of(&addr("0xa")), Some(all));
        assert_eq!(partition.cluster_of(&addr("0xf")), Some(all));
    }

    #[test]
    fn expand_senders_excludes_probe_and_exchanges() {
        let store = store_with_txs(vec![
            tx("0x1", 1, "0xs1", "0xdep", 1.0),
            tx("0x2", 2, "0xs2", "0xdep", 1.0),
            tx("0x3", 3, "0xex", "0xdep", 1.0),
        ]);
        store
            .register_exchanges(&[Exchange {
                name: "Ex".to_string(),
                address: addr("0xex"),
            }])
            .unwrap();

        let senders = store.expand_senders(&addr("0xdep"), &addr("0xs1")).unwrap();
        assert_eq!(senders, vec![addr("0xs2")]);
    }

    #[test]
    fn expand_deposits_requires_exchange_forwarding() {
        // s1 funds dep1 and dep2; only dep2 forwards to an exchange.
        let store = store_with_txs(vec![
            tx("0x1", 1, "0xs1", "0xdep1", 1.0),
            tx("0x2", 2, "0xs1", "0xdep2", 1.0),
            tx("0x3", 3, "0xdep2", "0xex", 1.0),
        ]);
        store
            .register_exchanges(&[Exchange {
                name: "Ex".to_string(),
                address: addr("0xex"),
            }])
            .unwrap();

        let deposits = store
            .expand_deposits(&[addr("0xs1")], &addr("0xdep1"))
            .unwrap();
        assert_eq!(deposits, vec![addr("0xdep2")]);

        let none = store.expand_deposits(&[], &addr("0xdep1")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn deposit_leg_respects_window_and_ratio() {
        let exchange_leg = tx("0xex-leg", 20_000, "0xdep", "0xex", 10.0);
        let store = store_with_txs(vec![
            // Outside the 10k window.
            tx("0x1", 9_000, "0xold", "0xdep", 10.0),
            // In window but value out of ratio.
            tx("0x2", 15_000, "0xbig", "0xdep", 100.0),
            // In window, in ratio; the most recent match wins.
            tx("0x3", 14_000, "0xs1", "0xdep", 11.0),
            tx("0x4", 16_000, "0xs2", "0xdep", 9.0),
            exchange_leg.clone(),
        ]);

        let leg = store.deposit_leg(&exchange_leg, 10_000, 1.5).unwrap().unwrap();
        assert_eq!(leg.hash, "0x4");
        assert_eq!(leg.from, addr("0xs2"));

        let none = store.deposit_leg(&exchange_leg, 100, 1.5).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn resolve_scope_rolls_back_on_error() {
        let store = store_with_txs(vec![tx("0x1", 1, "0xa", "0xb", 1.0)]);

        let result: Result<()> = store.resolve_scope(|scope| {
            let id = scope.create_cluster()?;
            scope.add_to_cluster(id, &[addr("0xa")])?;
            bail!("boom");
        });
        assert!(result.is_err());

        // The partial cluster assignment did not survive.
        assert_eq!(store.account(&addr("0xa")).unwrap().cluster, None);
    }
}
