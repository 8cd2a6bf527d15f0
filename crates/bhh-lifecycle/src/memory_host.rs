use crate::host::{
    ClickCallback, DomError, HostPage, ListenerId, MutationCallback, NodeRef, ObservationId,
};
use bhh_core::{ElementView, Selector};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub visible: bool,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

impl Element {
    fn from_spec(spec: ElementSpec, parent: Option<NodeRef>) -> Self {
        Self {
            tag: spec.tag,
            id: spec.id,
            classes: spec.classes,
            attrs: spec.attrs,
            text: spec.text,
            visible: true,
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent
    }

    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }
}

impl ElementView for Element {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn element_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|candidate| candidate == class)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Handles to the pieces of a console region built by
/// [`MemoryHost::mount_console`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleNodes {
    pub region: NodeRef,
    pub toolbar: NodeRef,
    pub execute: NodeRef,
    pub native_history: NodeRef,
    pub operation_editor: NodeRef,
    pub variables_editor: NodeRef,
    pub explorer: NodeRef,
}

struct Tree {
    next_node: u64,
    next_listener: u64,
    next_observation: u64,
    nodes: BTreeMap<NodeRef, Element>,
    document: NodeRef,
    body: NodeRef,
    observers: BTreeMap<ObservationId, (NodeRef, MutationCallback)>,
    listeners: BTreeMap<ListenerId, (NodeRef, ClickCallback)>,
    batch_depth: usize,
    dirty: BTreeSet<NodeRef>,
    rejected_parents: BTreeMap<NodeRef, String>,
}

impl Tree {
    fn new() -> Self {
        let document = NodeRef(1);
        let body = NodeRef(2);
        let mut nodes = BTreeMap::new();
        let mut root = Element::from_spec(ElementSpec::new("html"), None);
        root.children.push(body);
        nodes.insert(document, root);
        nodes.insert(body, Element::from_spec(ElementSpec::new("body"), Some(document)));
        Self {
            next_node: 3,
            next_listener: 1,
            next_observation: 1,
            nodes,
            document,
            body,
            observers: BTreeMap::new(),
            listeners: BTreeMap::new(),
            batch_depth: 0,
            dirty: BTreeSet::new(),
            rejected_parents: BTreeMap::new(),
        }
    }

    fn get(&self, node: NodeRef) -> Result<&Element, DomError> {
        self.nodes.get(&node).ok_or(DomError::NodeNotFound(node))
    }

    fn get_mut(&mut self, node: NodeRef) -> Result<&mut Element, DomError> {
        self.nodes.get_mut(&node).ok_or(DomError::NodeNotFound(node))
    }

    fn insert(
        &mut self,
        parent: NodeRef,
        index: usize,
        spec: ElementSpec,
    ) -> Result<NodeRef, DomError> {
        self.get(parent)?;
        let node = NodeRef(self.next_node);
        self.next_node += 1;
        self.nodes.insert(node, Element::from_spec(spec, Some(parent)));

        let siblings = &mut self.get_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, node);
        self.dirty.insert(parent);
        Ok(node)
    }

    fn remove(&mut self, node: NodeRef) -> bool {
        let Some(parent) = self.nodes.get(&node).and_then(Element::parent) else {
            return false;
        };
        if let Some(parent_element) = self.nodes.get_mut(&parent) {
            parent_element.children.retain(|child| *child != node);
        }

        let removed = self.subtree(node);
        for gone in &removed {
            self.nodes.remove(gone);
        }
        self.listeners
            .retain(|_, (target, _)| !removed.contains(target));
        self.dirty.insert(parent);
        true
    }

    /// `from` and its descendants in document order.
    fn subtree(&self, from: NodeRef) -> Vec<NodeRef> {
        let mut order = Vec::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if let Some(element) = self.nodes.get(&node) {
                order.push(node);
                stack.extend(element.children.iter().rev().copied());
            }
        }
        order
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(&current).and_then(Element::parent);
        }
        false
    }

    fn matching(&self, selector: &Selector) -> impl Iterator<Item = NodeRef> + '_ {
        let selector = selector.clone();
        self.subtree(self.document)
            .into_iter()
            .filter(move |node| {
                self.nodes
                    .get(node)
                    .is_some_and(|element| selector.matches(element))
            })
    }

    fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.subtree(self.document).into_iter().find(|node| {
            self.nodes
                .get(node)
                .is_some_and(|element| element.id.as_deref() == Some(id))
        })
    }
}

/// An in-memory host page: a small element tree with subtree observers,
/// batched mutation delivery and click listeners.
pub struct MemoryHost {
    tree: RefCell<Tree>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            tree: RefCell::new(Tree::new()),
        }
    }

    pub fn document(&self) -> NodeRef {
        self.tree.borrow().document
    }

    pub fn body(&self) -> NodeRef {
        self.tree.borrow().body
    }

    pub fn append(&self, parent: NodeRef, spec: ElementSpec) -> Result<NodeRef, DomError> {
        self.insert(parent, usize::MAX, spec)
    }

    pub fn insert(
        &self,
        parent: NodeRef,
        index: usize,
        spec: ElementSpec,
    ) -> Result<NodeRef, DomError> {
        let node = self.tree.borrow_mut().insert(parent, index, spec)?;
        self.flush();
        Ok(node)
    }

    pub fn remove(&self, node: NodeRef) -> bool {
        let removed = self.tree.borrow_mut().remove(node);
        self.flush();
        removed
    }

    pub fn set_text(&self, node: NodeRef, text: impl Into<String>) -> Result<(), DomError> {
        self.tree.borrow_mut().get_mut(node)?.text = text.into();
        Ok(())
    }

    /// Runs `mutate` with observer delivery held back, then notifies each
    /// affected observer once.
    pub fn batch<R>(&self, mutate: impl FnOnce(&Self) -> R) -> R {
        self.tree.borrow_mut().batch_depth += 1;
        let result = mutate(self);
        self.tree.borrow_mut().batch_depth -= 1;
        self.flush();
        result
    }

    pub fn click(&self, node: NodeRef) -> usize {
        let callbacks: Vec<ClickCallback> = self
            .tree
            .borrow()
            .listeners
            .values()
            .filter(|(target, _)| *target == node)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    pub fn element(&self, node: NodeRef) -> Option<Element> {
        self.tree.borrow().nodes.get(&node).cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.tree.borrow().find_by_id(id)
    }

    pub fn count_matching(&self, selector: &Selector) -> usize {
        self.tree.borrow().matching(selector).count()
    }

    pub fn is_visible(&self, node: NodeRef) -> Option<bool> {
        self.tree.borrow().nodes.get(&node).map(|element| element.visible)
    }

    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .map(|element| element.children.clone())
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.tree.borrow().listeners.len()
    }

    pub fn observer_count(&self) -> usize {
        self.tree.borrow().observers.len()
    }

    /// Makes every later `insert_container` under `parent` fail.
    pub fn reject_inserts_into(&self, parent: NodeRef, reason: impl Into<String>) {
        self.tree
            .borrow_mut()
            .rejected_parents
            .insert(parent, reason.into());
    }

    /// Builds the console region the default selectors look for, as one
    /// mutation batch.
    pub fn mount_console(&self) -> Result<ConsoleNodes, DomError> {
        let body = self.body();
        self.batch(|host| {
            let region = host.append(body, ElementSpec::new("div").class("graphiql-container"))?;
            let editor_wrap = host.append(region, ElementSpec::new("div").class("editorWrap"))?;
            let toolbar = host.append(editor_wrap, ElementSpec::new("div").class("toolbar"))?;
            let execute = host.append(
                toolbar,
                ElementSpec::new("button")
                    .class("execute-button")
                    .attr("title", "Execute Query"),
            )?;
            host.append(
                toolbar,
                ElementSpec::new("button")
                    .class("toolbar-button")
                    .attr("title", "Prettify Query"),
            )?;
            let native_history = host.append(
                toolbar,
                ElementSpec::new("button")
                    .class("toolbar-button")
                    .attr("title", "Show History"),
            )?;
            let operation_editor =
                host.append(editor_wrap, ElementSpec::new("div").class("CodeMirror-code"))?;
            let variables_editor =
                host.append(editor_wrap, ElementSpec::new("div").class("CodeMirror-code"))?;
            let explorer = host.append(region, ElementSpec::new("div").class("docExplorerWrap"))?;
            Ok(ConsoleNodes {
                region,
                toolbar,
                execute,
                native_history,
                operation_editor,
                variables_editor,
                explorer,
            })
        })
    }

    pub fn set_editor_text(
        &self,
        console: &ConsoleNodes,
        operation: &str,
        variables: &str,
    ) -> Result<(), DomError> {
        self.set_text(console.operation_editor, operation)?;
        self.set_text(console.variables_editor, variables)
    }

    fn flush(&self) {
        let callbacks: Vec<MutationCallback> = {
            let mut tree = self.tree.borrow_mut();
            if tree.batch_depth > 0 || tree.dirty.is_empty() {
                return;
            }
            let dirty = std::mem::take(&mut tree.dirty);
            let tree = &*tree;
            tree.observers
                .values()
                .filter(|(root, _)| {
                    dirty
                        .iter()
                        .any(|parent| tree.is_inclusive_ancestor(*root, *parent))
                })
                .map(|(_, callback)| callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl HostPage for MemoryHost {
    fn query(&self, selector: &Selector) -> Option<NodeRef> {
        self.tree.borrow().matching(selector).next()
    }

    fn query_all(&self, selector: &Selector) -> Vec<NodeRef> {
        self.tree.borrow().matching(selector).collect()
    }

    fn text_content(&self, node: NodeRef) -> Option<String> {
        let tree = self.tree.borrow();
        tree.nodes.get(&node)?;
        let lines: Vec<&str> = tree
            .subtree(node)
            .iter()
            .filter_map(|part| tree.nodes.get(part))
            .map(|element| element.text.as_str())
            .filter(|text| !text.is_empty())
            .collect();
        Some(lines.join("\n"))
    }

    fn child_count(&self, node: NodeRef) -> Result<usize, DomError> {
        Ok(self.tree.borrow().get(node)?.children.len())
    }

    fn insert_container(
        &self,
        parent: NodeRef,
        element_id: &str,
        index: usize,
    ) -> Result<NodeRef, DomError> {
        if let Some(reason) = self.tree.borrow().rejected_parents.get(&parent) {
            return Err(DomError::Rejected {
                operation: "insert_container",
                reason: reason.clone(),
            });
        }
        self.insert(parent, index, ElementSpec::new("div").id(element_id))
    }

    fn remove_element(&self, element_id: &str) -> bool {
        let Some(node) = self.find_by_id(element_id) else {
            return false;
        };
        self.remove(node)
    }

    fn set_visible(&self, node: NodeRef, visible: bool) -> Result<(), DomError> {
        self.tree.borrow_mut().get_mut(node)?.visible = visible;
        Ok(())
    }

    fn add_click_listener(
        &self,
        node: NodeRef,
        callback: ClickCallback,
    ) -> Result<ListenerId, DomError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(node)?;
        let id = ListenerId(tree.next_listener);
        tree.next_listener += 1;
        tree.listeners.insert(id, (node, callback));
        Ok(id)
    }

    fn remove_click_listener(&self, listener: ListenerId) -> bool {
        self.tree.borrow_mut().listeners.remove(&listener).is_some()
    }

    fn observe_subtree(
        &self,
        root: NodeRef,
        callback: MutationCallback,
    ) -> Result<ObservationId, DomError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(root)?;
        let id = ObservationId(tree.next_observation);
        tree.next_observation += 1;
        tree.observers.insert(id, (root, callback));
        Ok(id)
    }

    fn disconnect(&self, observation: ObservationId) {
        self.tree.borrow_mut().observers.remove(&observation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bhh_core::HostSelectors;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter(host: &MemoryHost, root: NodeRef) -> Rc<Cell<usize>> {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        host.observe_subtree(root, Rc::new(move || seen.set(seen.get() + 1)))
            .expect("observe");
        calls
    }

    #[test]
    fn console_matches_default_selectors() {
        let host = MemoryHost::new();
        let console = host.mount_console().expect("console");
        let selectors = HostSelectors::default();

        assert_eq!(host.query(&selectors.target_region), Some(console.region));
        assert_eq!(host.query(&selectors.toolbar), Some(console.toolbar));
        assert_eq!(host.query(&selectors.execute_control), Some(console.execute));
        assert_eq!(
            host.query(&selectors.native_history_control),
            Some(console.native_history)
        );
        assert_eq!(
            host.query_all(&selectors.editors),
            vec![console.operation_editor, console.variables_editor]
        );
        assert_eq!(host.query(&selectors.observer_root), Some(host.body()));
    }

    #[test]
    fn batch_delivers_one_notification() {
        let host = MemoryHost::new();
        let calls = counter(&host, host.body());

        host.mount_console().expect("console");
        assert_eq!(calls.get(), 1);

        let body = host.body();
        host.append(body, ElementSpec::new("span")).expect("append");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn observers_only_see_their_subtree() {
        let host = MemoryHost::new();
        let body = host.body();
        let left = host.append(body, ElementSpec::new("div")).expect("left");
        let right = host.append(body, ElementSpec::new("div")).expect("right");
        let calls = counter(&host, left);

        host.append(right, ElementSpec::new("p")).expect("append right");
        assert_eq!(calls.get(), 0);

        let inner = host.append(left, ElementSpec::new("p")).expect("append left");
        host.append(inner, ElementSpec::new("b")).expect("append nested");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn insert_container_respects_index_and_rejection() {
        let host = MemoryHost::new();
        let console = host.mount_console().expect("console");

        let button = host
            .insert_container(console.toolbar, "btn", 1)
            .expect("insert");
        assert_eq!(host.children(console.toolbar)[1], button);

        let tail = host
            .insert_container(console.toolbar, "tail", 99)
            .expect("append");
        assert_eq!(host.children(console.toolbar).last(), Some(&tail));

        host.reject_inserts_into(console.region, "locked");
        let err = host
            .insert_container(console.region, "pane", 0)
            .expect_err("rejected");
        assert!(matches!(err, DomError::Rejected { .. }));
    }

    #[test]
    fn removing_a_subtree_drops_its_listeners() {
        let host = MemoryHost::new();
        let console = host.mount_console().expect("console");
        let clicks = Rc::new(Cell::new(0));
        let seen = clicks.clone();
        host.add_click_listener(console.execute, Rc::new(move || seen.set(seen.get() + 1)))
            .expect("listen");

        assert_eq!(host.click(console.execute), 1);
        assert_eq!(clicks.get(), 1);

        assert!(host.remove(console.region));
        assert_eq!(host.listener_count(), 0);
        assert!(host.element(console.execute).is_none());
        assert_eq!(host.click(console.execute), 0);
    }

    #[test]
    fn text_content_joins_descendant_text() {
        let host = MemoryHost::new();
        let console = host.mount_console().expect("console");
        host.append(console.operation_editor, ElementSpec::new("pre").text("query a {"))
            .expect("line");
        host.append(console.operation_editor, ElementSpec::new("pre").text("  b"))
            .expect("line");
        host.append(console.operation_editor, ElementSpec::new("pre").text("}"))
            .expect("line");

        assert_eq!(
            host.text_content(console.operation_editor).as_deref(),
            Some("query a {\n  b\n}")
        );
        assert_eq!(host.text_content(NodeRef(9_999)), None);
    }
}
