//! Storage engine adapter.
//!
//! Wraps a single [`redb::Database`] file carrying the six sub-databases
//! the original LMDB environment kept: `global`, `block`, `txn`, `pq`,
//! `artifact`, `height`. Every table is untyped bytes-in, bytes-out —
//! `dataservice-proto` owns the record layouts, this crate only owns
//! durability and transaction scoping.
//!
//! Nested transactions mirror the LMDB child-transaction model: a root
//! [`Txn`] owns the real `redb` write transaction, and [`Txn::nested`]
//! hands back a [`NestedTxn`] that marks a savepoint inside it rather
//! than opening a second `redb` transaction. Committing a nested
//! transaction is a no-op (its writes are already visible to the
//! parent); aborting one restores the savepoint, undoing only that
//! child's writes and leaving the parent transaction open.

use dataservice_base::StatusCode;
use redb::{Database, ReadableTable, Savepoint, TableDefinition};
use std::path::Path;
use tracing::{debug, error};

const GLOBAL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("global");
const BLOCK_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("block");
const TXN_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("txn");
const PQ_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pq");
const ARTIFACT_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("artifact");
const HEIGHT_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("height");

/// The six sub-databases a transaction can address.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Table {
    Global,
    Block,
    Txn,
    Pq,
    Artifact,
    Height,
}

impl Table {
    fn def(self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        match self {
            Table::Global => GLOBAL_TABLE,
            Table::Block => BLOCK_TABLE,
            Table::Txn => TXN_TABLE,
            Table::Pq => PQ_TABLE,
            Table::Artifact => ARTIFACT_TABLE,
            Table::Height => HEIGHT_TABLE,
        }
    }
}

/// An open storage environment: one `redb` database file holding all six
/// sub-databases. Cheap to clone — `redb::Database` is internally
/// reference-counted-safe for our single-threaded event loop use.
pub struct Env {
    db: Database,
}

impl Env {
    /// Opens (creating if absent) the database file at `path` and
    /// ensures all six sub-databases exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Env, StatusCode> {
        let db = Database::create(path.as_ref()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "failed to open environment");
            StatusCode::EnvOpenFailure
        })?;
        {
            let txn = db.begin_write().map_err(|e| {
                error!(target: "dataservice-store", error = %e, "failed to begin init transaction");
                StatusCode::EnvCreateFailure
            })?;
            for table in [
                Table::Global,
                Table::Block,
                Table::Txn,
                Table::Pq,
                Table::Artifact,
                Table::Height,
            ] {
                txn.open_table(table.def()).map_err(|e| {
                    error!(target: "dataservice-store", error = %e, "failed to open sub-database");
                    StatusCode::DbiOpenFailure
                })?;
            }
            txn.commit().map_err(|e| {
                error!(target: "dataservice-store", error = %e, "failed to commit init transaction");
                StatusCode::EnvCreateFailure
            })?;
        }
        debug!(target: "dataservice-store", path = %path.as_ref().display(), "environment opened");
        Ok(Env { db })
    }

    /// Begins a root read-write transaction.
    pub fn begin_txn(&self) -> Result<Txn<'_>, StatusCode> {
        let inner = self.db.begin_write().map_err(|e| {
            error!(target: "dataservice-store", error = %e, "txn begin failed");
            StatusCode::TxnBeginFailure
        })?;
        Ok(Txn {
            inner: Some(inner),
            _env: std::marker::PhantomData,
        })
    }

    /// Begins a read-only transaction.
    pub fn begin_read(&self) -> Result<ReadTxn<'_>, StatusCode> {
        let inner = self.db.begin_read().map_err(|e| {
            error!(target: "dataservice-store", error = %e, "read txn begin failed");
            StatusCode::TxnBeginFailure
        })?;
        Ok(ReadTxn {
            inner,
            _env: std::marker::PhantomData,
        })
    }
}

/// A root read-write transaction. Drop without calling [`Txn::commit`]
/// to abort.
pub struct Txn<'env> {
    inner: Option<redb::WriteTransaction>,
    // `'env` keeps the transaction's lifetime pinned to its owning `Env`
    // even though `redb::WriteTransaction` doesn't itself borrow it.
    _env: std::marker::PhantomData<&'env Env>,
}

impl<'env> Txn<'env> {
    fn inner(&self) -> &redb::WriteTransaction {
        self.inner.as_ref().expect("txn used after commit/abort")
    }

    /// Opens a savepoint-backed nested transaction scoped to this root
    /// transaction. The nested transaction's writes go directly into the
    /// same underlying `redb` transaction; only [`NestedTxn::abort`]
    /// distinguishes it from writing at the root.
    pub fn nested(&mut self) -> Result<NestedTxn<'_>, StatusCode> {
        let txn = self.inner.as_mut().expect("txn used after commit/abort");
        let savepoint = txn.ephemeral_savepoint().map_err(|e| {
            error!(target: "dataservice-store", error = %e, "nested txn begin failed");
            StatusCode::TxnBeginFailure
        })?;
        Ok(NestedTxn {
            txn,
            savepoint: Some(savepoint),
        })
    }

    pub fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StatusCode> {
        let t = self.inner().open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::GetFailure
        })?;
        let v = t.get(key).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "get failed");
            StatusCode::GetFailure
        })?;
        Ok(v.map(|g| g.value().to_vec()))
    }

    /// Inserts `key -> value`, failing with [`StatusCode::MdbPutFailure`]
    /// if an entry already exists (the no-overwrite collision case used
    /// to detect duplicate block/transaction/artifact UUIDs).
    pub fn put_no_overwrite(
        &mut self,
        table: Table,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StatusCode> {
        let mut t = self.inner().open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::PutFailure
        })?;
        if t.get(key)
            .map_err(|e| {
                error!(target: "dataservice-store", error = %e, "get failed");
                StatusCode::PutFailure
            })?
            .is_some()
        {
            return Err(StatusCode::MdbPutFailure);
        }
        t.insert(key, value).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "insert failed");
            StatusCode::PutFailure
        })?;
        Ok(())
    }

    /// Inserts or overwrites `key -> value`.
    pub fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StatusCode> {
        let mut t = self.inner().open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::PutFailure
        })?;
        t.insert(key, value).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "insert failed");
            StatusCode::PutFailure
        })?;
        Ok(())
    }

    pub fn del(&mut self, table: Table, key: &[u8]) -> Result<(), StatusCode> {
        let mut t = self.inner().open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::DelFailure
        })?;
        t.remove(key).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "remove failed");
            StatusCode::DelFailure
        })?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), StatusCode> {
        let inner = self.inner.take().expect("txn used after commit/abort");
        inner.commit().map_err(|e| {
            error!(target: "dataservice-store", error = %e, "commit failed");
            StatusCode::TxnCommitFailure
        })
    }

    /// Aborts the whole root transaction, discarding every write made
    /// under it including any nested transactions.
    pub fn abort(mut self) {
        drop(self.inner.take());
    }
}

/// A nested transaction scoped to an open [`Txn`]. Reuses the parent's
/// underlying `redb` transaction; only its own savepoint is rolled back
/// on abort.
pub struct NestedTxn<'p> {
    txn: &'p mut redb::WriteTransaction,
    savepoint: Option<Savepoint>,
}

impl<'p> NestedTxn<'p> {
    pub fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StatusCode> {
        let t = self.txn.open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::GetFailure
        })?;
        let v = t.get(key).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "get failed");
            StatusCode::GetFailure
        })?;
        Ok(v.map(|g| g.value().to_vec()))
    }

    pub fn put_no_overwrite(
        &mut self,
        table: Table,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StatusCode> {
        let mut t = self.txn.open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::PutFailure
        })?;
        if t.get(key)
            .map_err(|e| {
                error!(target: "dataservice-store", error = %e, "get failed");
                StatusCode::PutFailure
            })?
            .is_some()
        {
            return Err(StatusCode::MdbPutFailure);
        }
        t.insert(key, value).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "insert failed");
            StatusCode::PutFailure
        })?;
        Ok(())
    }

    pub fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StatusCode> {
        let mut t = self.txn.open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::PutFailure
        })?;
        t.insert(key, value).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "insert failed");
            StatusCode::PutFailure
        })?;
        Ok(())
    }

    pub fn del(&mut self, table: Table, key: &[u8]) -> Result<(), StatusCode> {
        let mut t = self.txn.open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::DelFailure
        })?;
        t.remove(key).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "remove failed");
            StatusCode::DelFailure
        })?;
        Ok(())
    }

    /// The nested transaction's writes are already part of the parent;
    /// there's nothing further to do.
    pub fn commit(self) {}

    /// Rolls back every write made since this nested transaction began,
    /// leaving the parent transaction open and otherwise untouched.
    pub fn abort(mut self) -> Result<(), StatusCode> {
        if let Some(savepoint) = self.savepoint.take() {
            self.txn.restore_savepoint(&savepoint).map_err(|e| {
                error!(target: "dataservice-store", error = %e, "savepoint restore failed");
                StatusCode::TxnCommitFailure
            })?;
        }
        Ok(())
    }
}

/// A read-only transaction.
pub struct ReadTxn<'env> {
    inner: redb::ReadTransaction,
    _env: std::marker::PhantomData<&'env Env>,
}

impl<'env> ReadTxn<'env> {
    pub fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StatusCode> {
        let t = self.inner.open_table(table.def()).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "open_table failed");
            StatusCode::GetFailure
        })?;
        let v = t.get(key).map_err(|e| {
            error!(target: "dataservice-store", error = %e, "get failed");
            StatusCode::GetFailure
        })?;
        Ok(v.map(|g| g.value().to_vec()))
    }
}
