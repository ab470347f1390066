use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Quit,
    Down,
    Up,
    Top,
    Bottom,
    ToggleFocus,
    ToggleHelp,
    ToggleSelection,
    ClearSelection,
    ToggleContextPanel,
    ZoomIntoFocused,
    ZoomIn,
    ZoomOut,
    ZoomPreset(f64),
    ZoomFit,
    Pan(i32, i32),
    ToggleContainers,
    Refresh,
    StartSearch,
    NextMatch,
    PrevMatch,
    OpenFilterPanel,
    NextFacet,
    PrevFacet,
    SelectAllValues,
    SelectNoValues,
    ApplyAllFacets,
    StartCommand,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Quit);
    }
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Search => map_search_mode_key(key),
        InputMode::Filter => map_filter_mode_key(key),
        InputMode::Command => map_command_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('H') | KeyCode::Left => Some(Action::Pan(-4, 0)),
        KeyCode::Char('L') | KeyCode::Right => Some(Action::Pan(4, 0)),
        KeyCode::Char('K') | KeyCode::PageUp => Some(Action::Pan(0, -4)),
        KeyCode::Char('J') | KeyCode::PageDown => Some(Action::Pan(0, 4)),
        KeyCode::Tab => Some(Action::ToggleFocus),
        KeyCode::Char(' ') => Some(Action::ToggleSelection),
        KeyCode::Char('x') => Some(Action::ClearSelection),
        KeyCode::Char('p') => Some(Action::ToggleContextPanel),
        KeyCode::Enter | KeyCode::Char('z') => Some(Action::ZoomIntoFocused),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Action::ZoomIn),
        KeyCode::Char('-') => Some(Action::ZoomOut),
        KeyCode::Char('5') => Some(Action::ZoomPreset(5.0)),
        KeyCode::Char('3') => Some(Action::ZoomPreset(3.0)),
        KeyCode::Char('1') => Some(Action::ZoomPreset(1.0)),
        KeyCode::Char('0') => Some(Action::ZoomFit),
        KeyCode::Char('c') => Some(Action::ToggleContainers),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('/') => Some(Action::StartSearch),
        KeyCode::Char('n') => Some(Action::NextMatch),
        KeyCode::Char('N') => Some(Action::PrevMatch),
        KeyCode::Char('f') => Some(Action::OpenFilterPanel),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Esc => Some(Action::CancelInput),
        _ => None,
    }
}

fn map_search_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Down | KeyCode::Tab => Some(Action::NextMatch),
        KeyCode::Up | KeyCode::BackTab => Some(Action::PrevMatch),
        KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::NextMatch)
        }
        KeyCode::Char('p') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::PrevMatch)
        }
        KeyCode::Char(c) => Some(Action::InputChar(c)),
        _ => None,
    }
}

fn map_filter_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => Some(Action::NextFacet),
        KeyCode::Char('h') | KeyCode::Left | KeyCode::BackTab => Some(Action::PrevFacet),
        KeyCode::Char(' ') => Some(Action::ToggleSelection),
        KeyCode::Char('a') => Some(Action::SelectAllValues),
        KeyCode::Char('x') => Some(Action::SelectNoValues),
        KeyCode::Char('A') => Some(Action::ApplyAllFacets),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('f') => Some(Action::CancelInput),
        _ => None,
    }
}

fn map_command_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) => Some(Action::InputChar(c)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, map_key};
    use crate::app::InputMode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn zoom_keys_map_to_presets() {
        assert_eq!(
            map_key(InputMode::Normal, key(KeyCode::Char('5'))),
            Some(Action::ZoomPreset(5.0))
        );
        assert_eq!(
            map_key(InputMode::Normal, key(KeyCode::Char('0'))),
            Some(Action::ZoomFit)
        );
        assert_eq!(
            map_key(InputMode::Normal, key(KeyCode::Enter)),
            Some(Action::ZoomIntoFocused)
        );
    }

    #[test]
    fn search_mode_types_letters_that_are_shortcuts_elsewhere() {
        assert_eq!(
            map_key(InputMode::Search, key(KeyCode::Char('n'))),
            Some(Action::InputChar('n'))
        );
        assert_eq!(
            map_key(InputMode::Normal, key(KeyCode::Char('n'))),
            Some(Action::NextMatch)
        );
        assert_eq!(
            map_key(InputMode::Search, key(KeyCode::Tab)),
            Some(Action::NextMatch)
        );
    }

    #[test]
    fn filter_panel_has_its_own_bindings() {
        assert_eq!(
            map_key(InputMode::Filter, key(KeyCode::Char(' '))),
            Some(Action::ToggleSelection)
        );
        assert_eq!(
            map_key(InputMode::Filter, key(KeyCode::Char('A'))),
            Some(Action::ApplyAllFacets)
        );
        assert_eq!(
            map_key(InputMode::Filter, key(KeyCode::Enter)),
            Some(Action::SubmitInput)
        );
    }

    #[test]
    fn ctrl_c_quits_from_any_mode() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        for mode in [
            InputMode::Normal,
            InputMode::Search,
            InputMode::Filter,
            InputMode::Command,
        ] {
            assert_eq!(map_key(mode, ctrl_c), Some(Action::Quit));
        }
    }
}
