use bhh_core::Selector;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub u64);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservationId(pub u64);

pub type MutationCallback = Rc<dyn Fn()>;
pub type ClickCallback = Rc<dyn Fn()>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeRef),
    #[error("host rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// The slice of the host page this crate reads and writes. Everything runs on
/// the page's single script thread, so callbacks are `Rc` and nothing here is
/// `Send`.
pub trait HostPage {
    fn query(&self, selector: &Selector) -> Option<NodeRef>;
    fn query_all(&self, selector: &Selector) -> Vec<NodeRef>;
    fn text_content(&self, node: NodeRef) -> Option<String>;
    fn child_count(&self, node: NodeRef) -> Result<usize, DomError>;

    /// Inserts an empty container element before the child currently at
    /// `index`, or appends when `index` is past the end.
    fn insert_container(
        &self,
        parent: NodeRef,
        element_id: &str,
        index: usize,
    ) -> Result<NodeRef, DomError>;
    fn remove_element(&self, element_id: &str) -> bool;
    fn set_visible(&self, node: NodeRef, visible: bool) -> Result<(), DomError>;

    fn add_click_listener(
        &self,
        node: NodeRef,
        callback: ClickCallback,
    ) -> Result<ListenerId, DomError>;
    fn remove_click_listener(&self, listener: ListenerId) -> bool;

    /// Child insertions and removals anywhere under `root` invoke `callback`
    /// once per mutation batch.
    fn observe_subtree(
        &self,
        root: NodeRef,
        callback: MutationCallback,
    ) -> Result<ObservationId, DomError>;
    fn disconnect(&self, observation: ObservationId);
}
