use std::fmt;

/// Bumped whenever the host page markup changes and the selector set below
/// has to follow.
pub const SELECTORS_VERSION: u32 = 1;

pub const BUTTON_CONTAINER_ID: &str = "better-history-button-container";
pub const PANE_CONTAINER_ID: &str = "better-history-pane-container";

/// The element surface a selector needs in order to match.
pub trait ElementView {
    fn tag(&self) -> &str;
    fn element_id(&self) -> Option<&str>;
    fn has_class(&self, class: &str) -> bool;
    fn attribute(&self, name: &str) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: String,
}

/// A compound simple selector: `tag#id.class[attr="value"]`, every part
/// optional but at least one present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatch>,
}

impl Selector {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into().to_ascii_lowercase()),
            ..Self::empty()
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::empty()
        }
    }

    pub fn class(class: impl Into<String>) -> Self {
        Self {
            classes: vec![class.into()],
            ..Self::empty()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(AttributeMatch {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    fn empty() -> Self {
        Self {
            tag: None,
            id: None,
            classes: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn matches(&self, element: &impl ElementView) -> bool {
        if let Some(tag) = &self.tag {
            if !element.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.element_id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        self.attributes
            .iter()
            .all(|attr| element.attribute(&attr.name) == Some(attr.value.as_str()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            f.write_str(tag)?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        for attr in &self.attributes {
            write!(f, "[{}=\"{}\"]", attr.name, attr.value)?;
        }
        Ok(())
    }
}

/// Where the extension looks for things on the host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSelectors {
    pub version: u32,
    pub observer_root: Selector,
    pub target_region: Selector,
    pub toolbar: Selector,
    pub execute_control: Selector,
    pub native_history_control: Selector,
    pub editors: Selector,
    pub button_container_id: String,
    pub pane_container_id: String,
}

impl Default for HostSelectors {
    fn default() -> Self {
        Self {
            version: SELECTORS_VERSION,
            observer_root: Selector::tag("body"),
            target_region: Selector::class("graphiql-container"),
            toolbar: Selector::class("toolbar"),
            execute_control: Selector::class("execute-button"),
            native_history_control: Selector::class("toolbar-button")
                .with_attr("title", "Show History"),
            editors: Selector::class("CodeMirror-code"),
            button_container_id: BUTTON_CONTAINER_ID.to_string(),
            pane_container_id: PANE_CONTAINER_ID.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Element {
        tag: &'static str,
        id: Option<&'static str>,
        classes: Vec<&'static str>,
        attrs: BTreeMap<&'static str, &'static str>,
    }

    impl ElementView for Element {
        fn tag(&self) -> &str {
            self.tag
        }

        fn element_id(&self) -> Option<&str> {
            self.id
        }

        fn has_class(&self, class: &str) -> bool {
            self.classes.iter().any(|candidate| *candidate == class)
        }

        fn attribute(&self, name: &str) -> Option<&str> {
            self.attrs.get(name).copied()
        }
    }

    fn history_button() -> Element {
        Element {
            tag: "button",
            id: None,
            classes: vec!["toolbar-button"],
            attrs: BTreeMap::from([("title", "Show History")]),
        }
    }

    #[test]
    fn compound_selector_matches_and_displays() {
        let selector = Selector::tag("button")
            .with_class("toolbar-button")
            .with_attr("title", "Show History");
        assert!(selector.matches(&history_button()));
        assert_eq!(
            selector.to_string(),
            "button.toolbar-button[title=\"Show History\"]"
        );
        assert_eq!(
            HostSelectors::default().native_history_control.to_string(),
            ".toolbar-button[title=\"Show History\"]"
        );
    }

    #[test]
    fn attribute_value_must_match() {
        let selector = Selector::class("toolbar-button").with_attr("title", "Prettify");
        assert!(!selector.matches(&history_button()));
        let missing = Selector::class("toolbar-button").with_attr("aria-label", "Show History");
        assert!(!missing.matches(&history_button()));
    }

    #[test]
    fn id_selector_matches_element_id() {
        let selector = Selector::id("variable-editor-title");
        let element = Element {
            tag: "div",
            id: Some("variable-editor-title"),
            classes: Vec::new(),
            attrs: BTreeMap::new(),
        };
        assert!(selector.matches(&element));
        assert!(!selector.matches(&history_button()));
    }
}
