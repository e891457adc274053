//! Interactive persona selection

use crate::error::{ErrorKind, Result};
use crate::input::InputSource;
use crate::render::{NoticeLevel, Renderer, guard};

use super::{Persona, PersonaRegistry};

/// Outcome of interactive selection
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen(Persona),
    /// The user picked the exit option or input ended
    Exit,
}

/// Menu key of the exit option: one past the highest numeric persona key
fn exit_key(registry: &PersonaRegistry) -> String {
    let highest = registry
        .all()
        .iter()
        .filter_map(|p| p.selection_key.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    (highest + 1).to_string()
}

/// Present the disclosed personas, read a choice and resolve it.
///
/// Invalid choices are reported and the menu is shown again; nothing else changes.
pub async fn select_interactive(
    registry: &PersonaRegistry,
    input: &mut dyn InputSource,
    renderer: &mut dyn Renderer,
) -> Result<Selection> {
    let exit = exit_key(registry);

    loop {
        guard(
            renderer.notice(
                NoticeLevel::Info,
                "Please choose the expertise level you want to interact with:",
            ),
            "menu",
        );
        for persona in registry.disclosed() {
            guard(
                renderer.notice(
                    NoticeLevel::Info,
                    &format!("{}. {}", persona.selection_key, persona.label),
                ),
                "menu",
            );
        }
        guard(
            renderer.notice(NoticeLevel::Info, &format!("{}. Exit", exit)),
            "menu",
        );
        guard(renderer.prompt("(You): "), "prompt");

        let choice = match input.read_line().await {
            Ok(Some(choice)) => choice,
            Ok(None) => return Ok(Selection::Exit),
            Err(e) if e.kind() == ErrorKind::Recoverable => {
                guard(
                    renderer.notice(NoticeLevel::Error, "Invalid choice. Please try again."),
                    "selection",
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        if choice == exit || choice.eq_ignore_ascii_case("exit") || choice.eq_ignore_ascii_case("quit")
        {
            return Ok(Selection::Exit);
        }

        match registry
            .resolve_selection(&choice)
            .or_else(|_| registry.resolve(&choice))
        {
            Ok(persona) => {
                tracing::info!(role = %persona.role_key, "Persona selected");
                guard(
                    renderer.notice(
                        NoticeLevel::Success,
                        &format!("You chose the expertise level: {}", persona.label),
                    ),
                    "selection",
                );
                return Ok(Selection::Chosen(persona));
            }
            Err(_) => {
                guard(
                    renderer.notice(NoticeLevel::Error, "Invalid choice. Please try again."),
                    "selection",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::LineReader;
    use crate::persona::PersonaKind;
    use crate::render::RecordingRenderer;

    fn input(script: &'static [u8]) -> LineReader<tokio::io::BufReader<tokio_test::io::Mock>> {
        let mut builder = tokio_test::io::Builder::new();
        if !script.is_empty() {
            builder.read(script);
        }
        LineReader::new(tokio::io::BufReader::new(builder.build()))
    }

    #[tokio::test]
    async fn test_selects_by_menu_key() {
        let registry = PersonaRegistry::builtin();
        let mut renderer = RecordingRenderer::new();
        let mut input = input(b"3\n");

        let selection = select_interactive(&registry, &mut input, &mut renderer)
            .await
            .unwrap();

        match selection {
            Selection::Chosen(persona) => assert_eq!(persona.kind, PersonaKind::Analyst),
            Selection::Exit => panic!("expected a persona"),
        }
        let menu = renderer.notices(NoticeLevel::Info);
        assert!(menu.contains(&"6. Exit"));
        assert!(!menu.iter().any(|line| line.contains("pirate")));
    }

    #[tokio::test]
    async fn test_invalid_choice_reprompts() {
        let registry = PersonaRegistry::builtin();
        let mut renderer = RecordingRenderer::new();
        let mut input = input(b"9\nbanana\n0\n");

        let selection = select_interactive(&registry, &mut input, &mut renderer)
            .await
            .unwrap();

        assert!(matches!(selection, Selection::Chosen(p) if p.kind == PersonaKind::Pirate));
        assert_eq!(renderer.notices(NoticeLevel::Error).len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_choice_reprompts() {
        let registry = PersonaRegistry::builtin();
        let mut renderer = RecordingRenderer::new();
        let mut input = input(b"\xff\xfe\n2\n");

        let selection = select_interactive(&registry, &mut input, &mut renderer)
            .await
            .unwrap();

        assert!(matches!(selection, Selection::Chosen(p) if p.kind == PersonaKind::Student));
        assert_eq!(renderer.notices(NoticeLevel::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_exit_option_and_eof() {
        let registry = PersonaRegistry::builtin();
        let mut renderer = RecordingRenderer::new();

        let mut exit = input(b"6\n");
        assert_eq!(
            select_interactive(&registry, &mut exit, &mut renderer)
                .await
                .unwrap(),
            Selection::Exit
        );

        let mut eof = input(b"");
        assert_eq!(
            select_interactive(&registry, &mut eof, &mut renderer)
                .await
                .unwrap(),
            Selection::Exit
        );
    }
}
