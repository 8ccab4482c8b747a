//! In-memory gallery of known face embeddings.

use crate::types::{Embedding, GalleryEntry, Identity};

/// Persistence seam for identities and their embedding sets.
pub trait IdentityStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list_identities(&self) -> Result<Vec<Identity>, Self::Error>;

    fn get_identity(&self, id: i64) -> Result<Option<Identity>, Self::Error>;

    /// Replace the stored embedding set of `id`.
    fn save_embeddings(&self, id: i64, embeddings: &[Embedding]) -> Result<(), Self::Error>;

    /// Delete an identity and its attendance history. Returns whether it existed.
    fn delete_identity(&self, id: i64) -> Result<bool, Self::Error>;
}

/// Flattened (embedding, identity) entries used for matching.
///
/// Contents only change through [`reload`](Self::reload).
#[derive(Debug, Default)]
pub struct FaceGallery {
    entries: Vec<GalleryEntry>,
    identities: usize,
}

impl FaceGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gallery from every identity in `store`.
    pub fn load<S: IdentityStore>(store: &S) -> Result<Self, S::Error> {
        Ok(Self::from_identities(store.list_identities()?))
    }

    /// Build a gallery from already-fetched identities.
    ///
    /// An identity whose embedding blob fails to decode is logged and skipped.
    pub fn from_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let mut gallery = Self::new();

        for identity in identities {
            let Some(blob) = identity.embeddings.as_deref() else {
                tracing::debug!(identity = identity.id, name = %identity.name, "no embeddings enrolled");
                continue;
            };

            let set = match Embedding::decode_set(blob) {
                Ok(set) => set,
                Err(e) => {
                    tracing::warn!(
                        identity = identity.id,
                        name = %identity.name,
                        error = %e,
                        "skipping identity with unreadable embeddings"
                    );
                    continue;
                }
            };

            if set.is_empty() {
                continue;
            }

            tracing::debug!(identity = identity.id, name = %identity.name, count = set.len(), "loaded embeddings");
            gallery.identities += 1;
            gallery.entries.extend(set.into_iter().map(|embedding| GalleryEntry {
                embedding,
                identity_id: identity.id,
                name: identity.name.clone(),
                reference: identity.reference.clone(),
            }));
        }

        tracing::info!(
            identities = gallery.identities,
            embeddings = gallery.entries.len(),
            "face gallery loaded"
        );
        gallery
    }

    /// Rebuild from `store`. On error the current contents are kept.
    pub fn reload<S: IdentityStore>(&mut self, store: &S) -> Result<(), S::Error> {
        *self = Self::load(store)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of embeddings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of identities contributing at least one embedding.
    pub fn identity_count(&self) -> usize {
        self.identities
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }
}
