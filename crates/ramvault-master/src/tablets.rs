//! The tablet map: which key ranges this master serves.

use crate::table::Table;
use ramvault_common::{Error, ObjectId, Result, TableId, Tablet, TabletState};
use std::collections::HashMap;

/// Tablets owned by this master plus per-table allocator state.
///
/// Lookup is a linear scan: masters hold few tablets and the scan is
/// cheaper than maintaining an ordered structure.
#[derive(Default)]
pub struct TabletMap {
    tablets: Vec<Tablet>,
    tables: HashMap<TableId, Table>,
}

impl TabletMap {
    /// Find the tablet covering a key. Distinguishes a recovering tablet
    /// (the client must retry later) from a range this master does not
    /// serve at all.
    pub fn locate(&self, table_id: TableId, object_id: ObjectId) -> Result<&Tablet> {
        for tablet in &self.tablets {
            if tablet.contains(table_id, object_id) {
                return match tablet.state {
                    TabletState::Normal => Ok(tablet),
                    TabletState::Recovering => Err(Error::TabletNotReady(table_id)),
                };
            }
        }
        Err(Error::TableDoesntExist(table_id))
    }

    /// Replace the tablet list. Allocator state survives for tables that
    /// keep at least one tablet, so version and id sequences continue
    /// across reconfiguration; tables with no remaining tablet are
    /// dropped.
    pub fn set_tablets(&mut self, tablets: Vec<Tablet>) {
        let mut tables = HashMap::new();
        for tablet in &tablets {
            let table = self
                .tables
                .remove(&tablet.table_id)
                .or_else(|| tables.remove(&tablet.table_id))
                .unwrap_or_default();
            tables.insert(tablet.table_id, table);
        }
        self.tablets = tablets;
        self.tables = tables;
    }

    /// Add one tablet, keeping any existing allocator state for its table.
    pub fn add_tablet(&mut self, tablet: Tablet) {
        self.tables.entry(tablet.table_id).or_default();
        self.tablets.push(tablet);
    }

    /// Flip every recovering tablet of the given list to normal.
    pub fn mark_recovered(&mut self, recovered: &[Tablet]) {
        for tablet in &mut self.tablets {
            let matches = recovered.iter().any(|r| {
                r.table_id == tablet.table_id
                    && r.start_id == tablet.start_id
                    && r.end_id == tablet.end_id
            });
            if matches && tablet.state == TabletState::Recovering {
                tablet.state = TabletState::Normal;
            }
        }
    }

    pub fn table_mut(&mut self, table_id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(&table_id)
    }

    #[must_use]
    pub fn tablets(&self) -> &[Tablet] {
        &self.tablets
    }
}
