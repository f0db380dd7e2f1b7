//! Supervisor ↔ child control-channel messages, carried over a Unix
//! domain socket kept deliberately separate from the JSON-RPC stdio
//! conversation with the agent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// child → parent: ask to be restarted once the checkpoint is durable.
    PlannedRestart { checkpoint: String },
    /// parent → child: the restart was accepted; the child may exit.
    RestartAck,
    /// either direction: a non-fatal problem worth logging on the other end.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_restart_serializes_with_checkpoint_path() {
        let msg = IpcMessage::PlannedRestart {
            checkpoint: "/tmp/ck.json".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"planned_restart","checkpoint":"/tmp/ck.json"}"#
        );
    }

    #[test]
    fn restart_ack_round_trips() {
        let json = r#"{"type":"restart_ack"}"#;
        let msg: IpcMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, IpcMessage::RestartAck);
    }

    #[test]
    fn unknown_shape_fails_to_parse() {
        let json = r#"{"type":"bogus"}"#;
        assert!(serde_json::from_str::<IpcMessage>(json).is_err());
    }
}
