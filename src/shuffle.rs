use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Question, Quiz};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffledOption {
    pub text: String,
    pub original_index: usize,
}

/// Question id to options in display order.
pub type ShuffleMap = BTreeMap<String, Vec<ShuffledOption>>;

pub fn shuffle_question<R: Rng + ?Sized>(question: &Question, rng: &mut R) -> Vec<ShuffledOption> {
    let mut shuffled: Vec<ShuffledOption> = question
        .options()
        .iter()
        .enumerate()
        .map(|(original_index, text)| ShuffledOption {
            text: text.clone(),
            original_index,
        })
        .collect();
    shuffled.shuffle(rng);
    shuffled
}

pub fn shuffle_quiz<R: Rng + ?Sized>(quiz: &Quiz, rng: &mut R) -> ShuffleMap {
    quiz.questions
        .iter()
        .map(|q| (q.id.clone(), shuffle_question(q, rng)))
        .collect()
}

/// Generates the mapping only when none exists yet. Returns whether it did.
pub fn ensure_shuffled<R: Rng + ?Sized>(
    mapping: &mut Option<ShuffleMap>,
    quiz: &Quiz,
    rng: &mut R,
) -> bool {
    if mapping.as_ref().is_some_and(|m| !m.is_empty()) {
        return false;
    }
    *mapping = Some(shuffle_quiz(quiz, rng));
    true
}

/// Checks that `shuffled` is a bijection onto `question`'s options.
pub fn is_permutation_of(question: &Question, shuffled: &[ShuffledOption]) -> bool {
    let options = question.options();
    if options.len() != shuffled.len() {
        return false;
    }
    let mut seen = vec![false; options.len()];
    for entry in shuffled {
        match (seen.get_mut(entry.original_index), options.get(entry.original_index)) {
            (Some(slot), Some(text)) if !*slot && *text == entry.text => *slot = true,
            _ => return false,
        }
    }
    true
}
