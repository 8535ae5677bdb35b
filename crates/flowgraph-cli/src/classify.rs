//! Node-type classification for the demonstration handler set (§1: the
//! concrete node catalog is an external collaborator, so this binary only
//! needs a small convention to exercise the DAG engine end-to-end).

use flowgraph_schemas::NodeTypeClass;

const TRIGGER_TYPES: &[&str] = &["start", "webhookTrigger", "scheduleTrigger"];
const CONFIG_TYPES: &[&str] = &["memory", "credentials", "skill"];
const TOOLKIT_TYPES: &[&str] = &["toolkit"];
const AGENT_TYPES: &[&str] = &["agent"];

pub fn classify(node_type: &str) -> NodeTypeClass {
    if TRIGGER_TYPES.contains(&node_type) {
        NodeTypeClass::Trigger
    } else if CONFIG_TYPES.contains(&node_type) {
        NodeTypeClass::Config
    } else if TOOLKIT_TYPES.contains(&node_type) {
        NodeTypeClass::Toolkit
    } else if AGENT_TYPES.contains(&node_type) {
        NodeTypeClass::Agent
    } else {
        NodeTypeClass::Executable
    }
}

pub fn is_trigger(node_type: &str) -> bool {
    classify(node_type) == NodeTypeClass::Trigger
}

pub fn is_config(node_type: &str) -> bool {
    classify(node_type) == NodeTypeClass::Config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_types() {
        assert_eq!(classify("start"), NodeTypeClass::Trigger);
        assert_eq!(classify("memory"), NodeTypeClass::Config);
        assert_eq!(classify("toolkit"), NodeTypeClass::Toolkit);
        assert_eq!(classify("agent"), NodeTypeClass::Agent);
        assert_eq!(classify("httpRequest"), NodeTypeClass::Executable);
    }
}
