use crate::storage::NoteRecord;

/// Chooses which notes fund a payment.
pub trait NotePicker: Send + Sync {
	/// Notes worth at least `value`, or `None` if the candidates cannot cover it.
	fn pick(&self, notes: &[NoteRecord], value: u128) -> Option<Vec<NoteRecord>>;
}

/// Greedy picker: smallest spendable notes first, at most `max_notes` of them.
/// When the smallest notes do not fit in `max_notes`, the largest ones are tried.
#[derive(Debug, Clone, Copy)]
pub struct SmallestFirstNotePicker {
	pub max_notes: usize,
}

impl Default for SmallestFirstNotePicker {
	fn default() -> Self {
		Self { max_notes: 2 }
	}
}

impl NotePicker for SmallestFirstNotePicker {
	fn pick(&self, notes: &[NoteRecord], value: u128) -> Option<Vec<NoteRecord>> {
		let mut spendable: Vec<&NoteRecord> = notes
			.iter()
			.filter(|note| note.index.is_some() && !note.nullified && !note.pending_spend)
			.collect();
		spendable.sort_by_key(|note| note.value);

		let mut picked = Vec::new();
		let mut total = 0u128;
		for note in &spendable {
			if total >= value && !picked.is_empty() {
				break;
			}
			picked.push((*note).clone());
			total = total.saturating_add(note.value);
		}
		if total < value || picked.is_empty() {
			return None;
		}
		if picked.len() <= self.max_notes {
			return Some(picked);
		}

		let largest: Vec<NoteRecord> = spendable
			.iter()
			.rev()
			.take(self.max_notes)
			.map(|note| (*note).clone())
			.collect();
		let total = largest.iter().fold(0u128, |sum, note| sum.saturating_add(note.value));
		(total >= value).then_some(largest)
	}
}
