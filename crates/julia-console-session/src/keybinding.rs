//! Keybinding allow-lists and the gate that consults them.
//!
//! An allow-list names keystrokes the editor keeps for itself. The gate
//! lets every other key through to the terminal.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use julia_console_core::{ConsoleSettings, KeyEvent, Subscription, TerminalClass};
use julia_console_terminal::KeyFilter;

use crate::settings::SettingsStore;

/// Lower-cased keystroke strings reserved for the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    keystrokes: HashSet<String>,
}

impl AllowList {
    /// Build from configured keystrokes, lower-casing each.
    pub fn new<I, S>(keystrokes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keystrokes: keystrokes
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Exact, case-insensitive membership.
    pub fn contains(&self, keystroke: &str) -> bool {
        self.keystrokes.contains(&keystroke.to_lowercase())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keystrokes.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.keystrokes.is_empty()
    }
}

/// Where a key event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The terminal consumes the event
    PassToTerminal,
    /// The terminal ignores it so the editor can dispatch a command
    ForwardToEditor,
}

/// Decide where `keystroke` goes given `list`.
pub fn gate(keystroke: &str, list: &AllowList) -> Verdict {
    if list.contains(keystroke) {
        Verdict::ForwardToEditor
    } else {
        Verdict::PassToTerminal
    }
}

/// The two allow-lists, one per terminal class.
///
/// Each list is swapped wholesale, so a reader sees either the old list or
/// the new one.
#[derive(Debug, Default)]
pub struct KeybindingAllowLists {
    repl: RwLock<Arc<AllowList>>,
    terminal: RwLock<Arc<AllowList>>,
}

impl KeybindingAllowLists {
    /// Lists seeded from `settings`.
    pub fn from_settings(settings: &ConsoleSettings) -> Arc<Self> {
        let lists = Arc::new(Self::default());
        lists.replace(
            TerminalClass::Repl,
            AllowList::new(&settings.whitelisted_keybindings_repl),
        );
        lists.replace(
            TerminalClass::Terminal,
            AllowList::new(&settings.whitelisted_keybindings_terminal),
        );
        lists
    }

    fn slot(&self, class: TerminalClass) -> &RwLock<Arc<AllowList>> {
        match class {
            TerminalClass::Repl => &self.repl,
            TerminalClass::Terminal => &self.terminal,
        }
    }

    /// Current list for `class`.
    pub fn get(&self, class: TerminalClass) -> Arc<AllowList> {
        Arc::clone(&self.slot(class).read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new list for `class`.
    pub fn replace(&self, class: TerminalClass, list: AllowList) {
        debug!("Allow-list for {:?} now has {} entries", class, list.len());
        *self.slot(class).write().unwrap_or_else(PoisonError::into_inner) = Arc::new(list);
    }

    /// Keep both lists in sync with `store`.
    pub fn bind(self: &Arc<Self>, store: &SettingsStore) -> Vec<Subscription> {
        let repl = Arc::clone(self);
        let terminal = Arc::clone(self);
        vec![
            store.observe(
                |s| s.whitelisted_keybindings_repl.clone(),
                move |keys: &Vec<String>| repl.replace(TerminalClass::Repl, AllowList::new(keys)),
            ),
            store.observe(
                |s| s.whitelisted_keybindings_terminal.clone(),
                move |keys: &Vec<String>| {
                    terminal.replace(TerminalClass::Terminal, AllowList::new(keys))
                },
            ),
        ]
    }
}

/// Key filter for one terminal class.
#[derive(Debug, Clone)]
pub struct KeybindingGate {
    lists: Arc<KeybindingAllowLists>,
    class: TerminalClass,
}

impl KeybindingGate {
    /// Gate reading the `class` list from `lists` on every event.
    pub fn new(lists: Arc<KeybindingAllowLists>, class: TerminalClass) -> Self {
        Self { lists, class }
    }

    /// Verdict for one event.
    pub fn verdict(&self, event: &KeyEvent) -> Verdict {
        let keystroke = event.keystroke();
        let verdict = gate(&keystroke, &self.lists.get(self.class));
        trace!("{} on {:?}: {:?}", keystroke, self.class, verdict);
        verdict
    }
}

impl KeyFilter for KeybindingGate {
    fn allows(&self, event: &KeyEvent) -> bool {
        self.verdict(event) == Verdict::PassToTerminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use julia_console_core::Key;
    use proptest::prelude::*;

    #[test]
    fn test_gate_is_case_insensitive_exact_match() {
        let list = AllowList::new(["Ctrl-Shift-P", "ctrl-c"]);
        assert_eq!(gate("ctrl-shift-p", &list), Verdict::ForwardToEditor);
        assert_eq!(gate("CTRL-C", &list), Verdict::ForwardToEditor);
        assert_eq!(gate("ctrl-shift", &list), Verdict::PassToTerminal);
        assert_eq!(gate("ctrl-c-x", &list), Verdict::PassToTerminal);
        assert_eq!(gate("a", &AllowList::default()), Verdict::PassToTerminal);
    }

    #[test]
    fn test_gate_uses_class_list() {
        let mut settings = ConsoleSettings::default();
        settings.whitelisted_keybindings_repl = vec!["Ctrl-P".to_string()];
        settings.whitelisted_keybindings_terminal = vec![];
        let lists = KeybindingAllowLists::from_settings(&settings);

        let ctrl_p = KeyEvent::new(Key::Char('p')).ctrl();
        let repl = KeybindingGate::new(Arc::clone(&lists), TerminalClass::Repl);
        let term = KeybindingGate::new(Arc::clone(&lists), TerminalClass::Terminal);
        assert!(!repl.allows(&ctrl_p));
        assert!(term.allows(&ctrl_p));
    }

    #[test]
    fn test_lists_follow_settings_live() {
        let store = SettingsStore::new(ConsoleSettings::default());
        let lists = KeybindingAllowLists::from_settings(&store.get());
        let _subs = lists.bind(&store);
        let gate = KeybindingGate::new(Arc::clone(&lists), TerminalClass::Terminal);
        let ctrl_k = KeyEvent::new(Key::Char('k')).ctrl();
        assert!(gate.allows(&ctrl_k));

        store.modify(|s| s.whitelisted_keybindings_terminal = vec!["Ctrl-K".to_string()]);
        assert!(!gate.allows(&ctrl_k));
    }

    fn keystroke() -> impl Strategy<Value = String> {
        "(ctrl-|alt-|shift-|cmd-){0,3}[a-zA-Z0-9]{1,6}"
    }

    proptest! {
        #[test]
        fn prop_gate_passes_iff_not_listed(
            key in keystroke(),
            list in proptest::collection::vec(keystroke(), 0..8),
        ) {
            let allow = AllowList::new(&list);
            let listed = list.iter().any(|k| k.to_lowercase() == key.to_lowercase());
            let expected = if listed { Verdict::ForwardToEditor } else { Verdict::PassToTerminal };
            prop_assert_eq!(gate(&key, &allow), expected);
        }

        #[test]
        fn prop_listed_key_always_forwarded(list in proptest::collection::vec(keystroke(), 1..8)) {
            let allow = AllowList::new(&list);
            for k in &list {
                prop_assert_eq!(gate(&k.to_uppercase(), &allow), Verdict::ForwardToEditor);
            }
        }
    }
}
