use crate::domain::{LineageNode, TaxId, Taxon};
use crate::error::AnnotateError;
use crate::store::RecordStore;
use crate::taxonomy::TaxonomySource;

/// Makes sure every ancestor of an organism is present in the taxonomy table.
pub struct TaxonomyResolver<'a, T: TaxonomySource + ?Sized> {
    source: &'a T,
}

impl<'a, T: TaxonomySource + ?Sized> TaxonomyResolver<'a, T> {
    pub fn new(source: &'a T) -> Self {
        Self { source }
    }

    /// Returns the organism's own (leaf) tax id after storing any missing
    /// ancestors.
    ///
    /// The known-taxa snapshot is read once per call. Missing taxa are written
    /// root first in a single transaction, so a committed child always has its
    /// parent. A concurrent resolver writing the same ids is harmless: the
    /// store skips duplicates.
    pub fn ensure_lineage<S: RecordStore>(
        &self,
        store: &mut S,
        organism_name: &str,
    ) -> Result<TaxId, AnnotateError> {
        let known = store.taxon_ids()?;
        let lineage = self.source.lineage(organism_name)?;
        let leaf = lineage
            .last()
            .map(|node| node.tax_id)
            .ok_or_else(|| AnnotateError::EmptyLineage(organism_name.to_string()))?;

        if lineage.iter().rev().all(|node| known.contains(&node.tax_id)) {
            return Ok(leaf);
        }

        let missing = lineage_taxa(&lineage)
            .into_iter()
            .filter(|taxon| !known.contains(&taxon.tax_id))
            .collect::<Vec<_>>();
        let inserted = store.insert_taxa(&missing)?;
        tracing::debug!(
            organism = organism_name,
            tax_id = %leaf,
            missing = missing.len(),
            inserted,
            "stored lineage"
        );
        Ok(leaf)
    }
}

/// Taxon rows for a root-to-leaf lineage, each parented by its predecessor.
pub fn lineage_taxa(lineage: &[LineageNode]) -> Vec<Taxon> {
    lineage
        .iter()
        .enumerate()
        .map(|(pos, node)| Taxon {
            tax_id: node.tax_id,
            name: node.name.clone(),
            parent_tax_id: pos.checked_sub(1).map(|parent| lineage[parent].tax_id),
        })
        .collect()
}
