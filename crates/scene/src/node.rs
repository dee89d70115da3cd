use std::str::FromStr;

use crate::error::{ConfigError, Result};

/// One element of a scene description.
///
/// The tree is fully owned: nodes can be cloned into entities that want to
/// keep an opaque sub-tree (for example a `<visual>` block) after loading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<SceneNode>,
    text: String,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: add an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder: append a child node.
    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: append a `<name>text</name>` child.
    pub fn with_param(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        let child = SceneNode::new(name).with_text(text);
        self.with_child(child)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub(crate) fn push_attr(&mut self, key: String, value: String) {
        self.attributes.push((key, value));
    }

    pub(crate) fn push_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trimmed text content.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute that must be present and non-empty.
    pub fn required_attr(&self, key: &'static str) -> Result<&str> {
        match self.attr(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::missing_attribute(key, &self.name)),
        }
    }

    pub fn bool_attr(&self, key: &str) -> Result<Option<bool>> {
        self.attr(key)
            .map(|v| parse_bool(v).ok_or_else(|| self.invalid(key, v, "expected a boolean")))
            .transpose()
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&SceneNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SceneNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Parse the text of child `<name>` if present.
    pub fn param<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(child) = self.child(name) else {
            return Ok(None);
        };
        child
            .text()
            .parse::<T>()
            .map(Some)
            .map_err(|e| self.invalid(name, child.text(), &e.to_string()))
    }

    pub fn param_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.param(name)?.unwrap_or(default))
    }

    /// Boolean child parameter (`true`/`false`/`1`/`0`/`yes`/`no`).
    pub fn bool_param(&self, name: &str) -> Result<Option<bool>> {
        let Some(child) = self.child(name) else {
            return Ok(None);
        };
        parse_bool(child.text())
            .map(Some)
            .ok_or_else(|| self.invalid(name, child.text(), "expected a boolean"))
    }

    /// Whitespace-separated numbers in child `<name>`, with an exact count.
    pub fn vector_param(&self, name: &str, len: usize) -> Result<Option<Vec<f64>>> {
        let Some(child) = self.child(name) else {
            return Ok(None);
        };
        let values = child
            .text()
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.invalid(name, child.text(), &e.to_string()))?;
        if values.len() != len {
            return Err(self.invalid(
                name,
                child.text(),
                &format!("expected {len} values, got {}", values.len()),
            ));
        }
        Ok(Some(values))
    }

    fn invalid(&self, param: &str, value: &str, why: &str) -> ConfigError {
        ConfigError::invalid_value(param, &self.name, format!("'{value}': {why}"))
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor() -> SceneNode {
        SceneNode::new("sensor")
            .with_attr("class", "pose")
            .with_param("sensor_period", "0.5")
            .with_param("pose", "1 2 90")
            .with_child(SceneNode::new("publish").with_attr("enabled", "false"))
    }

    #[test]
    fn required_attr_present_and_missing() {
        let node = sensor();
        assert_eq!(node.required_attr("class").unwrap(), "pose");
        let err = node.required_attr("name").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingAttribute { attribute: "name", .. }
        ));
        assert!(err.to_string().contains("<sensor>"));
    }

    #[test]
    fn empty_attr_counts_as_missing() {
        let node = SceneNode::new("vehicle").with_attr("class", "  ");
        assert!(node.required_attr("class").is_err());
    }

    #[test]
    fn typed_params() {
        let node = sensor();
        assert_eq!(node.param::<f64>("sensor_period").unwrap(), Some(0.5));
        assert_eq!(node.param::<f64>("absent").unwrap(), None);
        assert_eq!(node.param_or("absent", 3u32).unwrap(), 3);
        assert_eq!(
            node.vector_param("pose", 3).unwrap(),
            Some(vec![1.0, 2.0, 90.0])
        );
    }

    #[test]
    fn bad_numbers_are_invalid_values() {
        let node = SceneNode::new("world").with_param("gravity", "strong");
        let err = node.param::<f64>("gravity").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let node = SceneNode::new("vehicle").with_param("init_pose", "1 2");
        assert!(node.vector_param("init_pose", 3).is_err());
    }

    #[test]
    fn booleans() {
        let node = sensor();
        let publish = node.child("publish").unwrap();
        assert_eq!(publish.bool_attr("enabled").unwrap(), Some(false));
        assert_eq!(publish.bool_attr("missing").unwrap(), None);
        let bad = SceneNode::new("publish").with_attr("enabled", "maybe");
        assert!(bad.bool_attr("enabled").is_err());
    }

    #[test]
    fn children_named_filters() {
        let node = SceneNode::new("vehicle")
            .with_child(SceneNode::new("sensor"))
            .with_child(SceneNode::new("visual"))
            .with_child(SceneNode::new("sensor"));
        assert_eq!(node.children_named("sensor").count(), 2);
        assert_eq!(node.children().len(), 3);
    }
}
