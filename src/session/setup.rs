//! Turns a raw question bank into the question list a session is created with.
//!
//! Repairs happen here, once, so the live protocol never meets an unanswerable question.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

use crate::session::model::{Choice, Question};

const CHOICE_LABELS: [&str; 4] = ["a", "b", "c", "d"];

/// Question as handed over by the content-management side.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    /// Generated from the position when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Question text.
    #[validate(custom(function = "validate_not_blank"))]
    pub prompt: String,
    /// Optional illustration.
    #[serde(default)]
    pub image: Option<String>,
    /// Free-form topic used to filter the bank.
    #[serde(default)]
    pub category: Option<String>,
    /// Two to four answer options.
    #[validate(length(min = 2, max = 4), nested)]
    pub choices: Vec<ChoiceInput>,
    /// Falls back to the first choice when missing or unknown.
    #[serde(default)]
    pub correct_choice_id: Option<String>,
}

/// Answer option as handed over with a [`QuestionInput`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChoiceInput {
    /// Generated from the position when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Button label.
    #[validate(custom(function = "validate_not_blank"))]
    pub text: String,
}

/// How a question bank is narrowed down for one session.
#[derive(Debug, Clone, Default)]
pub struct QuestionSetOptions {
    /// Keep only questions whose category matches (case-insensitive).
    pub category: Option<String>,
    /// Shuffle before applying `limit`.
    pub shuffle: bool,
    /// Maximum number of questions kept after filtering and shuffling.
    pub limit: Option<usize>,
}

/// Filter, validate, repair, shuffle, and truncate a question bank.
///
/// Invalid questions are dropped with a warning. A missing or dangling `correctChoiceId` is
/// repaired to the first choice.
pub fn prepare_questions(inputs: Vec<QuestionInput>, options: &QuestionSetOptions) -> Vec<Question> {
    let total = inputs.len();
    let mut questions = inputs
        .into_iter()
        .enumerate()
        .filter(|(_, input)| matches_category(input, options.category.as_deref()))
        .filter_map(|(position, input)| match input.validate() {
            Ok(()) => Some(build_question(position, input)),
            Err(err) => {
                warn!(position, error = %err, "dropping invalid question");
                None
            }
        })
        .collect::<Vec<_>>();

    dedupe_question_ids(&mut questions);

    if options.shuffle && questions.len() > 1 {
        questions.shuffle(&mut rand::rng());
    }

    if let Some(limit) = options.limit {
        questions.truncate(limit);
    }

    debug!(total, kept = questions.len(), "prepared question set");
    questions
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

fn matches_category(input: &QuestionInput, wanted: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => input
            .category
            .as_deref()
            .is_some_and(|category| category.trim().eq_ignore_ascii_case(wanted.trim())),
    }
}

fn build_question(position: usize, input: QuestionInput) -> Question {
    let id = input
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("q{}", position + 1));

    let mut choices = input
        .choices
        .into_iter()
        .map(|choice| Choice {
            id: choice.id.unwrap_or_default(),
            text: choice.text,
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    let ids_usable = choices
        .iter()
        .all(|choice| !choice.id.trim().is_empty() && seen.insert(choice.id.clone()));
    if !ids_usable {
        // Positional labels keep ids stable for a given choice order.
        let mapping = choices
            .iter_mut()
            .zip(CHOICE_LABELS)
            .map(|(choice, label)| {
                let original = std::mem::replace(&mut choice.id, label.to_owned());
                (original, label)
            })
            .collect::<Vec<_>>();
        let correct = input.correct_choice_id.as_deref().and_then(|wanted| {
            mapping
                .iter()
                .find(|(original, _)| !original.is_empty() && original == wanted)
                .map(|(_, label)| (*label).to_owned())
        });
        return finish(id, input.prompt, input.image, choices, correct);
    }

    finish(id, input.prompt, input.image, choices, input.correct_choice_id)
}

fn finish(
    id: String,
    prompt: String,
    image: Option<String>,
    choices: Vec<Choice>,
    correct_choice_id: Option<String>,
) -> Question {
    let correct_choice_id = match correct_choice_id {
        Some(correct) if choices.iter().any(|choice| choice.id == correct) => correct,
        other => {
            let fallback = choices
                .first()
                .map(|choice| choice.id.clone())
                .unwrap_or_default();
            warn!(
                question = %id,
                declared = ?other,
                fallback = %fallback,
                "repairing correct choice to first choice"
            );
            fallback
        }
    };

    Question {
        id,
        prompt,
        image: image.filter(|image| !image.trim().is_empty()),
        choices,
        correct_choice_id,
    }
}

fn dedupe_question_ids(questions: &mut [Question]) {
    let mut seen = HashSet::new();
    for (position, question) in questions.iter_mut().enumerate() {
        if !seen.insert(question.id.clone()) {
            let replacement = format!("{}-{}", question.id, position + 1);
            warn!(duplicate = %question.id, %replacement, "renaming duplicate question id");
            seen.insert(replacement.clone());
            question.id = replacement;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(id: Option<&str>, text: &str) -> ChoiceInput {
        ChoiceInput {
            id: id.map(str::to_owned),
            text: text.to_owned(),
        }
    }

    fn question(prompt: &str, choices: Vec<ChoiceInput>, correct: Option<&str>) -> QuestionInput {
        QuestionInput {
            id: None,
            prompt: prompt.to_owned(),
            image: None,
            category: None,
            choices,
            correct_choice_id: correct.map(str::to_owned),
        }
    }

    #[test]
    fn keeps_consistent_questions_untouched() {
        let input = question(
            "Capital of France?",
            vec![choice(Some("x"), "Paris"), choice(Some("y"), "Lyon")],
            Some("x"),
        );
        let prepared = prepare_questions(vec![input], &QuestionSetOptions::default());

        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].id, "q1");
        assert_eq!(prepared[0].correct_choice_id, "x");
        assert!(prepared[0].has_choice("y"));
    }

    #[test]
    fn repairs_dangling_correct_choice_to_first_choice() {
        let input = question(
            "2+2?",
            vec![choice(Some("a"), "4"), choice(Some("b"), "5")],
            Some("zzz"),
        );
        let prepared = prepare_questions(vec![input], &QuestionSetOptions::default());
        assert_eq!(prepared[0].correct_choice_id, "a");

        let missing = question("3+3?", vec![choice(Some("k"), "6"), choice(Some("l"), "7")], None);
        let prepared = prepare_questions(vec![missing], &QuestionSetOptions::default());
        assert_eq!(prepared[0].correct_choice_id, "k");
    }

    #[test]
    fn assigns_positional_choice_ids_and_follows_the_correct_one() {
        let input = question(
            "Pick two",
            vec![choice(Some("dup"), "one"), choice(Some("two"), "two"), choice(None, "three")],
            Some("two"),
        );
        let prepared = prepare_questions(vec![input], &QuestionSetOptions::default());
        let ids = prepared[0]
            .choices
            .iter()
            .map(|choice| choice.id.as_str())
            .collect::<Vec<_>>();

        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(prepared[0].correct_choice_id, "b");
    }

    #[test]
    fn drops_questions_that_fail_validation() {
        let too_few = question("Lonely", vec![choice(None, "only")], None);
        let too_many = question(
            "Crowded",
            (0..5).map(|i| choice(None, &i.to_string())).collect(),
            None,
        );
        let blank = question("   ", vec![choice(None, "a"), choice(None, "b")], None);
        let blank_choice = question("Choice?", vec![choice(None, " "), choice(None, "b")], None);
        let fine = question("Fine", vec![choice(None, "a"), choice(None, "b")], None);

        let prepared = prepare_questions(
            vec![too_few, too_many, blank, blank_choice, fine],
            &QuestionSetOptions::default(),
        );
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].prompt, "Fine");
        assert_eq!(prepared[0].id, "q5");
    }

    #[test]
    fn filters_by_category_and_limits() {
        let mut bank = (0..6)
            .map(|i| question(&format!("Q{i}"), vec![choice(None, "a"), choice(None, "b")], None))
            .collect::<Vec<_>>();
        for (i, input) in bank.iter_mut().enumerate() {
            input.category = Some(if i % 2 == 0 { "Math" } else { "History" }.to_owned());
        }

        let options = QuestionSetOptions {
            category: Some("math".into()),
            shuffle: true,
            limit: Some(2),
        };
        let prepared = prepare_questions(bank, &options);

        assert_eq!(prepared.len(), 2);
        assert!(prepared.iter().all(|q| ["Q0", "Q2", "Q4"].contains(&q.prompt.as_str())));
    }

    #[test]
    fn duplicate_question_ids_are_renamed() {
        let mut first = question("A", vec![choice(None, "a"), choice(None, "b")], None);
        first.id = Some("same".into());
        let mut second = first.clone();
        second.prompt = "B".into();

        let prepared = prepare_questions(vec![first, second], &QuestionSetOptions::default());
        assert_eq!(prepared[0].id, "same");
        assert_eq!(prepared[1].id, "same-2");
    }
}
