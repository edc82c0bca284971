//! Kurzwelle Store – Persistenz-Vertraege und In-Memory-Backend
//!
//! Der Server kennt die Persistenz nur ueber die Traits in `traits`.
//! `MemoryStore` ist die mitgelieferte Implementierung; eine
//! SQL-Implementierung erfuellt dieselben Vertraege.

pub mod error;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{AclZeile, BanEintrag, BenutzerRecord};
pub use traits::{AclStore, BanStore, BenutzerStore, GruppenStore, TexturStore};
