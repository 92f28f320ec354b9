use std::sync::Arc;

use serde::Serialize;

use crate::blast::{SearchParams, SearchService};
use crate::domain::{AlignmentRecord, Fragment, TaxId};
use crate::error::AnnotateError;
use crate::extract::extract;
use crate::resolver::TaxonomyResolver;
use crate::store::{InsertOutcome, RecordStore, StoreConnector};
use crate::taxonomy::TaxonomySource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FragmentReport {
    pub header: String,
    pub fragment_inserted: bool,
    pub alignments: usize,
    pub unresolved_taxa: usize,
}

/// Annotates one fragment end to end: search, extract, resolve, persist.
pub struct AnnotationWorker<Q: ?Sized, T: ?Sized, C> {
    search: Arc<Q>,
    taxonomy: Arc<T>,
    connector: Arc<C>,
    params: SearchParams,
}

impl<Q: ?Sized, T: ?Sized, C> Clone for AnnotationWorker<Q, T, C> {
    fn clone(&self) -> Self {
        Self {
            search: Arc::clone(&self.search),
            taxonomy: Arc::clone(&self.taxonomy),
            connector: Arc::clone(&self.connector),
            params: self.params.clone(),
        }
    }
}

impl<Q, T, C> AnnotationWorker<Q, T, C>
where
    Q: SearchService + ?Sized,
    T: TaxonomySource + ?Sized,
    C: StoreConnector,
{
    pub fn new(search: Arc<Q>, taxonomy: Arc<T>, connector: Arc<C>) -> Self {
        Self {
            search,
            taxonomy,
            connector,
            params: SearchParams::default(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Search and store failures abort the fragment. Taxonomy failures only
    /// cost the affected record its tax id.
    pub fn annotate(&self, fragment: &Fragment) -> Result<FragmentReport, AnnotateError> {
        tracing::info!(header = %fragment.header, "sending BLAST request");
        let document = self.search.search(&fragment.sequence, &self.params)?;
        tracing::info!(header = %fragment.header, "BLAST complete");
        let records = extract(&document)?;

        let mut store = self.connector.connect()?;
        let fragment_inserted = store.insert_fragment(fragment)? == InsertOutcome::Inserted;

        let resolver = TaxonomyResolver::new(self.taxonomy.as_ref());
        let mut report = FragmentReport {
            header: fragment.header.clone(),
            fragment_inserted,
            ..FragmentReport::default()
        };
        for record in &records {
            let tax_id = self.resolve_tax_id(&resolver, &mut store, fragment, record)?;
            if tax_id.is_none() {
                report.unresolved_taxa += 1;
            }
            store.insert_protein(&record.protein(tax_id))?;
            store.insert_alignment(&fragment.header, record)?;
            report.alignments += 1;
        }
        Ok(report)
    }

    fn resolve_tax_id(
        &self,
        resolver: &TaxonomyResolver<'_, T>,
        store: &mut C::Store,
        fragment: &Fragment,
        record: &AlignmentRecord,
    ) -> Result<Option<TaxId>, AnnotateError> {
        let resolved = match record.organism_name.as_deref() {
            Some(name) => resolver.ensure_lineage(store, name),
            None => Err(AnnotateError::MissingOrganismName(record.title.clone())),
        };
        match resolved {
            Ok(tax_id) => Ok(Some(tax_id)),
            Err(err) if err.is_record_recoverable() => {
                tracing::warn!(
                    header = %fragment.header,
                    organism = record.organism_name.as_deref().unwrap_or("<none>"),
                    title = %record.title,
                    error = %err,
                    "taxonomy lookup failed"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
