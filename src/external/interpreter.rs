//! The Z-Machine interpreter process collaborator.
//!
//! The orchestrator never parses frotz output format itself beyond the
//! coarse classification below; everything else is handed to the parser
//! agents via [`super::language_model`]. Spawning and managing the actual
//! frotz subprocess is out of scope for this crate — this trait is the
//! seam a real process wrapper would sit behind.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClass {
    Normal,
    Death,
    Victory,
    SaveSuccess,
    SaveFailure,
    RestoreSuccess,
    RestoreFailure,
}

/// Cheap heuristic classification of a raw interpreter transcript chunk.
/// Parser agents still run over `Normal` output; this only short-circuits
/// the turn loop for the handful of outcomes the orchestrator must react to
/// structurally rather than semantically.
pub fn classify_output(raw: &str) -> OutputClass {
    let lower = raw.to_lowercase();
    if lower.contains("you have died") || lower.contains("you are dead") || lower.contains("*** you have died ***") {
        OutputClass::Death
    } else if lower.contains("*** you have won ***") || lower.contains("you have won") || lower.contains("victory") {
        OutputClass::Victory
    } else if lower.contains("ok.") && lower.contains("save") {
        OutputClass::SaveSuccess
    } else if lower.contains("save failed") || lower.contains("failed.") && lower.contains("save") {
        OutputClass::SaveFailure
    } else if lower.contains("restore") && lower.contains("ok.") {
        OutputClass::RestoreSuccess
    } else if lower.contains("restore") && lower.contains("failed") {
        OutputClass::RestoreFailure
    } else {
        OutputClass::Normal
    }
}

#[async_trait::async_trait]
pub trait Interpreter: Send + Sync {
    /// Sends one command line to the running game and returns its raw
    /// transcript output.
    async fn do_command(&mut self, command: &str) -> anyhow::Result<String>;

    /// Issues a save under `label` (e.g. a save-slot filename), returning
    /// whether the interpreter accepted it.
    async fn save(&mut self, label: &str) -> anyhow::Result<bool>;

    /// Restores from `label`, returning whether the interpreter accepted it.
    async fn restore(&mut self, label: &str) -> anyhow::Result<bool>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_death() {
        assert_eq!(classify_output("*** You have died ***"), OutputClass::Death);
    }

    #[test]
    fn classifies_normal_room_description() {
        assert_eq!(classify_output("West of House\nYou are standing in an open field."), OutputClass::Normal);
    }

    #[tokio::test]
    async fn scripted_interpreter_replays_in_order() {
        let mut interp = test_double::ScriptedInterpreter::new(vec!["first".into(), "second".into()]);
        assert_eq!(interp.do_command("look").await.unwrap(), "first");
        assert_eq!(interp.do_command("north").await.unwrap(), "second");
        assert_eq!(interp.commands_seen, vec!["look".to_string(), "north".to_string()]);
    }
}
