//! Language picker: language group → variant → confirmation.
//!
//! The picker is a pure state machine fed one line of user input at a time; [`run_picker`]
//! drives it over any [`PromptIo`]. A confirmed variant is recorded in the session's
//! [`VariantChoices`]; cancelling or declining leaves them untouched.

use async_trait::async_trait;
use recap_voice::{LanguageGroup, VariantChoices, VoiceTable};
use tracing::info;

/// Line-oriented user interaction.
#[async_trait]
pub trait PromptIo: Send {
    /// Show `prompt` and wait for one line. `None` when input is closed.
    async fn ask(&mut self, prompt: &str) -> Option<String>;

    /// Show an informational line.
    fn show(&mut self, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PickerState {
    ChoosingGroup,
    ChoosingVariant { label: String, variants: Vec<String> },
    Confirming { label: String, variants: Vec<String>, locale: String },
}

/// Result of feeding one line to the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerStep {
    /// Keep going; optionally show a notice first.
    Continue(Option<String>),
    /// Done: the confirmed locale, or `None` when cancelled.
    Finished(Option<String>),
}

pub struct LanguagePicker<'a> {
    table: &'a VoiceTable,
    state: PickerState,
    /// Started directly at the variant list (voice disambiguation); "back" cancels.
    variants_only: bool,
}

impl<'a> LanguagePicker<'a> {
    /// Full picker starting at the language list.
    pub fn new(table: &'a VoiceTable) -> Self {
        Self {
            table,
            state: PickerState::ChoosingGroup,
            variants_only: false,
        }
    }

    /// Disambiguation for one base language with several candidate locales.
    pub fn for_candidates(table: &'a VoiceTable, base: &str, candidates: Vec<String>) -> Self {
        Self {
            table,
            state: PickerState::ChoosingVariant {
                label: base.to_string(),
                variants: candidates,
            },
            variants_only: true,
        }
    }

    fn group_variants(&self, group: &LanguageGroup) -> Vec<String> {
        let mut variants: Vec<String> = group
            .bases
            .iter()
            .flat_map(|base| self.table.candidates(base))
            .collect();
        variants.sort();
        variants.dedup();
        variants
    }

    /// Menu text for the current state.
    pub fn prompt(&self) -> String {
        match &self.state {
            PickerState::ChoosingGroup => {
                let mut menu = String::from("Select language:\n");
                for (i, group) in self.table.groups().iter().enumerate() {
                    menu.push_str(&format!("  {:2}) {}\n", i + 1, group.name));
                }
                menu.push_str("   c) Cancel\n→ Choice: ");
                menu
            }
            PickerState::ChoosingVariant { label, variants } => {
                let mut menu = format!("Variants for {}:\n", label);
                for (i, locale) in variants.iter().enumerate() {
                    let voice = self.table.voice_for(locale).unwrap_or("?");
                    menu.push_str(&format!("  {:2}) {:<10} → {}\n", i + 1, locale, voice));
                }
                menu.push_str("   b) Back    c) Cancel\n→ Variant: ");
                menu
            }
            PickerState::Confirming { label, locale, .. } => {
                format!("Confirm {} = {}? (y/n): ", label, locale)
            }
        }
    }

    /// Feed one line of input.
    pub fn handle(&mut self, input: &str, choices: &mut VariantChoices) -> PickerStep {
        let input = input.trim().to_lowercase();
        if input.is_empty() {
            return PickerStep::Continue(None);
        }
        match std::mem::replace(&mut self.state, PickerState::ChoosingGroup) {
            PickerState::ChoosingGroup => {
                if input == "c" {
                    return PickerStep::Finished(None);
                }
                let groups = self.table.groups();
                match parse_index(&input, groups.len()) {
                    Some(idx) => {
                        let group = &groups[idx];
                        self.state = PickerState::ChoosingVariant {
                            label: group.name.clone(),
                            variants: self.group_variants(group),
                        };
                        PickerStep::Continue(None)
                    }
                    None => PickerStep::Continue(Some("✗ Invalid; try again.".to_string())),
                }
            }
            PickerState::ChoosingVariant { label, variants } => {
                if input == "c" || (input == "b" && self.variants_only) {
                    return PickerStep::Finished(None);
                }
                if input == "b" {
                    return PickerStep::Continue(None);
                }
                match parse_index(&input, variants.len()) {
                    Some(idx) => {
                        let locale = variants[idx].clone();
                        self.state = PickerState::Confirming { label, variants, locale };
                        PickerStep::Continue(None)
                    }
                    None => {
                        self.state = PickerState::ChoosingVariant { label, variants };
                        PickerStep::Continue(Some("✗ Invalid; try again.".to_string()))
                    }
                }
            }
            PickerState::Confirming { label, variants, locale } => {
                if input == "y" || input == "yes" {
                    choices.confirm(&locale);
                    let voice = self.table.voice_for(&locale).unwrap_or("?");
                    info!(language = %label, locale = %locale, voice, "language variant selected");
                    return PickerStep::Finished(Some(locale));
                }
                self.state = PickerState::ChoosingVariant { label, variants };
                PickerStep::Continue(Some("✗ Not confirmed; retry.".to_string()))
            }
        }
    }
}

fn parse_index(input: &str, len: usize) -> Option<usize> {
    match input.parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Some(n - 1),
        _ => None,
    }
}

/// Drive a picker to completion. Closed input counts as cancel.
pub async fn run_picker(
    mut picker: LanguagePicker<'_>,
    io: &mut dyn PromptIo,
    choices: &mut VariantChoices,
) -> Option<String> {
    loop {
        let prompt = picker.prompt();
        let input = io.ask(&prompt).await?;
        match picker.handle(&input, choices) {
            PickerStep::Finished(result) => {
                if let Some(ref locale) = result {
                    io.show(&format!("✔️  voice set to {}", locale));
                }
                return result;
            }
            PickerStep::Continue(Some(notice)) => io.show(&notice),
            PickerStep::Continue(None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        inputs: VecDeque<&'static str>,
        shown: Vec<String>,
        asked: usize,
    }

    impl Scripted {
        fn new(inputs: &[&'static str]) -> Self {
            Self { inputs: inputs.iter().copied().collect(), shown: Vec::new(), asked: 0 }
        }
    }

    #[async_trait]
    impl PromptIo for Scripted {
        async fn ask(&mut self, _prompt: &str) -> Option<String> {
            self.asked += 1;
            self.inputs.pop_front().map(str::to_string)
        }
        fn show(&mut self, text: &str) {
            self.shown.push(text.to_string());
        }
    }

    fn group_index(table: &VoiceTable, name: &str) -> String {
        let idx = table.groups().iter().position(|g| g.name == name).unwrap();
        (idx + 1).to_string()
    }

    #[test]
    fn confirm_records_choice() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut picker = LanguagePicker::new(&table);

        let english = group_index(&table, "English");
        assert_eq!(picker.handle(&english, &mut choices), PickerStep::Continue(None));
        assert!(picker.prompt().contains("en-AU"));

        // sorted en-* list: en-AU, en-GB, en-GB-WLS, en-IE, ...
        assert_eq!(picker.handle("4", &mut choices), PickerStep::Continue(None));
        assert!(picker.prompt().contains("en-IE"));
        assert_eq!(picker.handle("y", &mut choices), PickerStep::Finished(Some("en-IE".into())));
        assert_eq!(choices.get("en"), Some("en-IE"));
    }

    #[test]
    fn decline_returns_to_variants_without_mutation() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut picker = LanguagePicker::new(&table);

        picker.handle(&group_index(&table, "Français"), &mut choices);
        picker.handle("1", &mut choices);
        let step = picker.handle("n", &mut choices);
        assert_eq!(step, PickerStep::Continue(Some("✗ Not confirmed; retry.".into())));
        assert!(choices.is_empty());
        assert!(picker.prompt().starts_with("Variants for Français"));
    }

    #[test]
    fn back_and_cancel() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut picker = LanguagePicker::new(&table);

        picker.handle(&group_index(&table, "Deutsch"), &mut choices);
        assert_eq!(picker.handle("b", &mut choices), PickerStep::Continue(None));
        assert!(picker.prompt().starts_with("Select language"));
        assert_eq!(picker.handle("c", &mut choices), PickerStep::Finished(None));
        assert!(choices.is_empty());
    }

    #[test]
    fn invalid_input_reprompts_same_state() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut picker = LanguagePicker::new(&table);
        assert!(matches!(picker.handle("999", &mut choices), PickerStep::Continue(Some(_))));
        assert!(matches!(picker.handle("abc", &mut choices), PickerStep::Continue(Some(_))));
        assert!(picker.prompt().starts_with("Select language"));
    }

    #[test]
    fn multi_base_group_lists_all_variants() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut picker = LanguagePicker::new(&table);
        picker.handle(&group_index(&table, "中文"), &mut choices);
        let prompt = picker.prompt();
        assert!(prompt.contains("cmn-CN"));
        assert!(prompt.contains("yue-CN"));
    }

    #[tokio::test]
    async fn disambiguation_back_means_cancel() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let picker = LanguagePicker::for_candidates(&table, "es", table.candidates("es"));
        let mut io = Scripted::new(&["b"]);
        assert_eq!(run_picker(picker, &mut io, &mut choices).await, None);
        assert!(choices.is_empty());
    }

    #[tokio::test]
    async fn run_picker_retries_after_decline() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let picker = LanguagePicker::for_candidates(&table, "es", table.candidates("es"));
        let mut io = Scripted::new(&["2", "n", "2", "y"]);
        let chosen = run_picker(picker, &mut io, &mut choices).await;
        assert_eq!(chosen.as_deref(), Some("es-MX"));
        assert_eq!(choices.get("es"), Some("es-MX"));
        assert_eq!(io.asked, 4);
        assert!(io.shown.iter().any(|s| s.contains("Not confirmed")));
    }

    #[tokio::test]
    async fn closed_input_cancels() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        let mut io = Scripted::new(&[]);
        assert_eq!(run_picker(LanguagePicker::new(&table), &mut io, &mut choices).await, None);
    }
}
