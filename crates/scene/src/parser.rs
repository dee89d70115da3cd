//! XML text to [`SceneNode`] tree.

use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{ConfigError, Result};
use crate::node::SceneNode;

/// Parse a scene description and return its root element.
///
/// # Errors
///
/// Returns [`ConfigError::Xml`] for malformed XML, a missing root element or
/// more than one root element.
pub fn parse_str(xml: &str) -> Result<SceneNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<SceneNode> = Vec::new();
    let mut root: Option<SceneNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(open_node(e)?),
            Ok(Event::Empty(ref e)) => {
                let node = open_node(e)?;
                close_node(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ConfigError::Xml("unbalanced closing tag".into()))?;
                close_node(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| ConfigError::Xml(e.to_string()))?;
                    top.push_text(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions.
            Ok(_) => {}
            Err(e) => {
                return Err(ConfigError::Xml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(ConfigError::Xml(format!(
            "unexpected end of document inside <{}>",
            open.name()
        )));
    }
    root.ok_or_else(|| ConfigError::Xml("document has no root element".into()))
}

/// Read and parse a scene file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<SceneNode> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "parsing scene file");
    parse_str(&text)
}

fn open_node(e: &BytesStart) -> Result<SceneNode> {
    let mut node = SceneNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ConfigError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ConfigError::Xml(err.to_string()))?
            .into_owned();
        node.push_attr(key, value);
    }
    Ok(node)
}

fn close_node(
    stack: &mut [SceneNode],
    root: &mut Option<SceneNode>,
    node: SceneNode,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.push_child(node),
        None if root.is_some() => {
            return Err(ConfigError::Xml(format!(
                "second root element <{}>",
                node.name()
            )));
        }
        None => *root = Some(node),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"<?xml version="1.0"?>
<!-- two robots and a wall -->
<world>
  <simul_timestep>0.05</simul_timestep>
  <vehicle name="r1" class="differential">
    <init_pose>0 0 90</init_pose>
    <sensor class="pose" name="odom">
      <sensor_period>0.5</sensor_period>
      <publish enabled="true"><publish_topic>/r1/odom</publish_topic></publish>
    </sensor>
  </vehicle>
  <block class="box"><size>1 2</size></block>
  <element class="ground_grid"/>
</world>"#;

    #[test]
    fn parses_nested_tree() {
        let root = parse_str(SCENE).unwrap();
        assert_eq!(root.name(), "world");
        assert_eq!(root.children().len(), 4);
        assert_eq!(root.param::<f64>("simul_timestep").unwrap(), Some(0.05));

        let vehicle = root.child("vehicle").unwrap();
        assert_eq!(vehicle.attr("name"), Some("r1"));
        let sensor = vehicle.child("sensor").unwrap();
        assert_eq!(sensor.attr("class"), Some("pose"));
        let publish = sensor.child("publish").unwrap();
        assert_eq!(publish.child("publish_topic").unwrap().text(), "/r1/odom");
    }

    #[test]
    fn self_closing_elements_become_leaf_nodes() {
        let root = parse_str(SCENE).unwrap();
        let element = root.child("element").unwrap();
        assert_eq!(element.attr("class"), Some("ground_grid"));
        assert!(element.children().is_empty());
    }

    #[test]
    fn entities_are_unescaped() {
        let root = parse_str(r#"<a k="x &amp; y">1 &lt; 2</a>"#).unwrap();
        assert_eq!(root.attr("k"), Some("x & y"));
        assert_eq!(root.text(), "1 < 2");
    }

    #[test]
    fn mismatched_tags_fail() {
        assert!(matches!(
            parse_str("<world><vehicle></world>"),
            Err(ConfigError::Xml(_))
        ));
    }

    #[test]
    fn truncated_document_fails() {
        let err = parse_str("<world><vehicle>").unwrap_err();
        assert!(err.to_string().contains("vehicle"));
    }

    #[test]
    fn empty_document_fails() {
        assert!(parse_str("   ").is_err());
    }

    #[test]
    fn two_roots_fail() {
        assert!(parse_str("<a/><b/>").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_file("/definitely/not/here.xml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
