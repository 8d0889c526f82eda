/*!
# Sessionvault Core

Encrypted, crash-safe persistence for an in-memory store of web session
records.

A live record store is snapshotted, serialized into a versioned container,
encrypted, and atomically written to a single payload file. On the next start
the payload is read back, decrypted, validated against the container's magic
token, and decoded. A payload is either restored in full or not at all.

- Hand-rolled binary record codec and magic-prefixed container
- AES-256-GCM payload encryption behind a pluggable cipher
- Atomic replace on the local filesystem (temp file, fsync, rename)
- A single serial worker per store, so persist, restore, and delete never overlap

## Usage

```rust,no_run
use sessionvault_core::{AesGcmCipher, DurableReader, DurableWriter, PersistConfig, container};
use std::sync::Arc;

let config = PersistConfig::with_base_dir("/var/lib/browser/incognito");
let storage = Arc::new(config.local_storage());
let cipher = Arc::new(AesGcmCipher::generate());

let writer = DurableWriter::new(Arc::clone(&storage), Arc::clone(&cipher), &config.file_name);
let plaintext = container::encode(&config.magic_token, &[])?;
writer.commit(&plaintext)?;

let reader = DurableReader::new(storage, cipher, &config.file_name, config.magic_token.clone());
let records = reader.load();
# Ok::<(), sessionvault_core::PersistError>(())
```
*/

pub mod cipher;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod reader;
pub mod record;
pub mod storage;
pub mod worker;
pub mod writer;


pub use cipher::{AesGcmCipher, PayloadCipher, UnavailableCipher};
pub use config::PersistConfig;
pub use container::DEFAULT_MAGIC_TOKEN;
pub use error::{PersistError, Result};
pub use orchestrator::{
    create_local_orchestrator, PendingRestore, PersistOutcome, PersistenceOrchestrator,
    RecordStore, RestoreOutcome,
};
pub use reader::{DurableReader, LoadOutcome};
pub use record::{Priority, Record, RecordFlags};
pub use storage::{LocalFileStorage, MemoryStorage, StorageAdapter};
pub use worker::SerialWorker;
pub use writer::DurableWriter;
