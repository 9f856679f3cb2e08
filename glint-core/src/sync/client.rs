//! Client side of state replication.
//!
//! The client owns one cell per selector name and applies incoming payloads
//! to them. Each payload is applied inside its own transaction, so a patch
//! touching several selectors is observed atomically while a replayed
//! history still shows every intermediate state.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;

use super::options::ClientOptions;
use super::patch::{apply_value, Patch, PatchIssue};
use super::payload::SyncPayload;
use super::value::Value;
use crate::reactive::{Cell, Runtime};

type IssueHook = Box<dyn FnMut(&PatchIssue)>;

/// Applies server payloads to local cells.
pub struct ClientSyncer {
    runtime: Runtime,
    atoms: IndexMap<String, Cell<Value>>,
    options: ClientOptions,
    hydrated: std::cell::Cell<bool>,
    on_issue: RefCell<Option<IssueHook>>,
}

impl ClientSyncer {
    pub fn new(
        runtime: &Runtime,
        atoms: impl IntoIterator<Item = (impl Into<String>, Cell<Value>)>,
        options: ClientOptions,
    ) -> Self {
        Self {
            runtime: runtime.clone(),
            atoms: atoms
                .into_iter()
                .map(|(name, cell)| (name.into(), cell))
                .collect(),
            options,
            hydrated: std::cell::Cell::new(false),
            on_issue: RefCell::new(None),
        }
    }

    /// Install a hook called for every desync found while applying patches.
    pub fn on_issue(&self, hook: impl FnMut(&PatchIssue) + 'static) {
        let hook: IssueHook = Box::new(hook);
        *self.on_issue.borrow_mut() = Some(hook);
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether an init payload has been applied.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated.get()
    }

    pub fn atom(&self, name: &str) -> Option<&Cell<Value>> {
        self.atoms.get(name)
    }

    /// Apply payloads in order.
    pub fn sync(&self, payloads: &[SyncPayload]) {
        for payload in payloads {
            let issues = match payload {
                SyncPayload::Init(state) => self.runtime.batch(|| self.init(state)),
                SyncPayload::Patch(patch) => {
                    if !self.hydrated.get() && self.options.ignore_unhydrated {
                        tracing::debug!(selectors = patch.len(), "dropping patch received before hydration");
                        continue;
                    }
                    self.runtime.batch(|| self.patch(patch))
                }
            };
            self.report(issues);
        }
    }

    fn init(&self, state: &IndexMap<String, Value>) -> Vec<PatchIssue> {
        for (name, cell) in &self.atoms {
            cell.set(state.get(name).cloned().unwrap_or(Value::Null));
        }
        self.hydrated.set(true);

        state
            .keys()
            .filter(|name| !self.atoms.contains_key(*name))
            .map(|name| PatchIssue::UnknownSelector { name: name.clone() })
            .collect()
    }

    fn patch(&self, patch: &IndexMap<String, Patch>) -> Vec<PatchIssue> {
        let mut issues = Vec::new();

        for (name, change) in patch {
            let Some(cell) = self.atoms.get(name) else {
                issues.push(PatchIssue::UnknownSelector { name: name.clone() });
                continue;
            };

            let mut value = cell.peek();
            issues.extend(apply_value(&mut value, change, name, self.options.missing_paths));
            cell.set(value);
        }

        issues
    }

    fn report(&self, issues: Vec<PatchIssue>) {
        for issue in issues {
            tracing::warn!(%issue, "client state out of sync");
            if let Some(hook) = self.on_issue.borrow_mut().as_mut() {
                hook(&issue);
            }
        }
    }
}

impl fmt::Debug for ClientSyncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSyncer")
            .field("atoms", &self.atoms.keys().collect::<Vec<_>>())
            .field("hydrated", &self.is_hydrated())
            .field("options", &self.options)
            .finish()
    }
}
