//! Query merge & pagination
//!
//! A `QueryGroup` merges up to 100 distinct point lookups of one partition
//! into a single compound filter and pages through the results.
//!
//! ## Filter lifecycle
//! ```text
//!   build (all targets) ──► query_page ──► deliver rows ──► next token?
//!          ▲                                    │               │
//!          └──── rebuild (active targets) ◄─ Satisfied          └─► done
//! ```
//! The filter is built once and only rebuilt after a page callback answers
//! `PageSignal::Satisfied`. An empty filter ends the scan without another
//! backend call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{
    decode_row_key, encode_row_key, parse_partition_key, partition_key, Entity, EntityId,
};
use crate::error::{Result, StoreError};
use crate::queue::{Operation, PageCallback, PageSignal};
use crate::service::{Filter, TableRow, TableService};

/// An operation waiting on a target
struct Waiter {
    op: Operation,
    /// A row for this target has been delivered
    resolved: bool,
    /// No longer part of the filter
    excluded: bool,
}

/// One distinct (partition, key) looked up by the group
struct Target {
    id: EntityId,
    row_key: String,
    waiters: Vec<Waiter>,
}

impl Target {
    fn is_active(&self) -> bool {
        self.waiters.iter().any(|w| !w.excluded)
    }
}

/// Summary of one paginated scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// `query_page` calls made
    pub pages: usize,
    /// Filter rebuilds forced by `Satisfied`
    pub rebuilds: usize,
    /// Targets that received a row
    pub found: usize,
}

/// Deduplicated retrieve group
pub struct QueryGroup {
    limit: usize,
    targets: Vec<Target>,
    index: HashMap<EntityId, usize>,
}

impl QueryGroup {
    /// Create an empty group holding at most `limit` distinct targets
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            targets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a retrieve to the group
    ///
    /// A duplicate of an existing target always joins it. A new target is
    /// refused (the operation is handed back) once the group is full.
    pub fn push(&mut self, op: Operation) -> std::result::Result<(), Operation> {
        let id = op.entity.id();
        let waiter = Waiter {
            op,
            resolved: false,
            excluded: false,
        };

        if let Some(&i) = self.index.get(&id) {
            self.targets[i].waiters.push(waiter);
            return Ok(());
        }
        if self.targets.len() >= self.limit {
            return Err(waiter.op);
        }

        self.index.insert(id.clone(), self.targets.len());
        self.targets.push(Target {
            row_key: encode_row_key(&id.key),
            id,
            waiters: vec![waiter],
        });
        Ok(())
    }

    /// Number of distinct targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of operations waiting across all targets
    pub fn operation_count(&self) -> usize {
        self.targets.iter().map(|t| t.waiters.len()).sum()
    }

    /// Compound filter over the still-active targets, one branch per target
    pub fn build_filter(&self) -> Filter {
        Filter::Or(
            self.targets
                .iter()
                .filter(|t| t.is_active())
                .map(|t| Filter::target(partition_key(t.id.partition), t.row_key.clone()))
                .collect(),
        )
    }

    /// Page through the service until no continuation token remains
    pub fn run<S: TableService + ?Sized>(&mut self, service: &S) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut filter: Option<Filter> = None;
        let mut token = None;

        loop {
            let current = filter.get_or_insert_with(|| self.build_filter());
            if current.is_empty() {
                break;
            }

            let page = service.query_page(current, token.as_ref())?;
            summary.pages += 1;

            if self.deliver(&page.rows, &mut summary) {
                filter = None;
                summary.rebuilds += 1;
            }

            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(summary)
    }

    /// Resolve waiters for one page of rows and notify their callbacks
    ///
    /// Returns true if the filter has to be rebuilt.
    fn deliver(&mut self, rows: &[TableRow], summary: &mut ScanSummary) -> bool {
        let mut newly: Vec<(usize, usize)> = Vec::new();

        for row in rows {
            let id = match row_id(row) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(row_key = %row.row_key, error = %e, "skipping undecodable row");
                    continue;
                }
            };
            let Some(&ti) = self.index.get(&id) else {
                tracing::warn!(row_key = %row.row_key, "row does not match any target");
                continue;
            };

            let target = &mut self.targets[ti];
            let mut any = false;
            for (wi, waiter) in target.waiters.iter_mut().enumerate() {
                if waiter.resolved {
                    continue;
                }
                waiter.op.set_value(row.value.clone());
                waiter.resolved = true;
                newly.push((ti, wi));
                any = true;
            }
            if any {
                summary.found += 1;
            }
        }

        // One call per distinct callback, with that page's entities
        let mut by_callback: Vec<(PageCallback, Vec<(usize, usize)>)> = Vec::new();
        for (ti, wi) in newly {
            let waiter = &mut self.targets[ti].waiters[wi];
            match &waiter.op.callback {
                None => waiter.excluded = true,
                Some(cb) => match by_callback.iter_mut().find(|(c, _)| Arc::ptr_eq(c, cb)) {
                    Some((_, members)) => members.push((ti, wi)),
                    None => by_callback.push((Arc::clone(cb), vec![(ti, wi)])),
                },
            }
        }

        let mut rebuild = false;
        for (callback, members) in by_callback {
            let entities: Vec<Entity> = members
                .iter()
                .map(|&(ti, wi)| self.targets[ti].waiters[wi].op.entity.clone())
                .collect();

            if (*callback)(&entities) == PageSignal::Satisfied {
                for (ti, wi) in members {
                    self.targets[ti].waiters[wi].excluded = true;
                }
                rebuild = true;
            }
        }
        rebuild
    }

    /// Settle every operation of the group
    ///
    /// On failure, operations that already received their row still
    /// complete successfully; the rest get the error.
    pub fn settle(self, outcome: &Result<ScanSummary>, partition: u64) {
        for target in self.targets {
            for waiter in target.waiters {
                match outcome {
                    Err(e) if !waiter.resolved => {
                        waiter.op.settle(Err(e.clone().in_partition(partition)))
                    }
                    _ => waiter.op.complete(),
                }
            }
        }
    }
}

fn row_id(row: &TableRow) -> Result<EntityId> {
    Ok(EntityId {
        partition: parse_partition_key(&row.partition_key)?,
        key: decode_row_key(&row.row_key)?,
    })
}

/// Split retrieves into groups of at most `limit` distinct targets
///
/// Duplicates of a target always land in the group holding it.
pub fn group_retrieves(ops: Vec<Operation>, limit: usize) -> Result<Vec<QueryGroup>> {
    if limit == 0 {
        return Err(StoreError::Config("query group limit must be at least 1".to_string()));
    }
    let mut groups: Vec<QueryGroup> = Vec::new();
    let mut home: HashMap<EntityId, usize> = HashMap::new();

    for op in ops {
        let id = op.entity.id();
        let slot = match home.get(&id) {
            Some(&slot) => slot,
            None => {
                if groups.last().map_or(true, |g| g.len() >= limit) {
                    groups.push(QueryGroup::new(limit));
                }
                let slot = groups.len() - 1;
                home.insert(id, slot);
                slot
            }
        };
        // Joining a known target or a group with room never refuses
        if let Err(op) = groups[slot].push(op) {
            tracing::error!(partition = op.entity.partition, "query group refused a retrieve");
            op.settle(Err(StoreError::Logic(
                "retrieve could not be placed in a query group".to_string(),
            )));
        }
    }
    Ok(groups)
}
