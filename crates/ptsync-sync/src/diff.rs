use ptsync_core::{normalize_value, ChangeSet, Classification, ProfileField, ProfileRecord};

/// Classify `incoming` against the last materialized values for the same key.
///
/// Volatile fields never count as a change. Both sides are normalized before comparison,
/// so sentinel tokens and whitespace noise do not register either.
pub fn classify(previous: Option<&ProfileRecord>, incoming: &ProfileRecord) -> ChangeSet {
    let Some(previous) = previous else {
        return ChangeSet {
            classification: Classification::New,
            changed: ProfileField::ALL.to_vec(),
        };
    };

    let changed: Vec<ProfileField> = ProfileField::ALL
        .iter()
        .copied()
        .filter(|field| !field.is_volatile())
        .filter(|field| normalize_value(previous.get(*field)) != normalize_value(incoming.get(*field)))
        .collect();

    let classification = if changed.is_empty() {
        Classification::Unchanged
    } else {
        Classification::Updated
    };
    ChangeSet {
        classification,
        changed,
    }
}

/// Audit note attached to an overwritten row.
pub fn change_note(before: &ProfileRecord, after: &ProfileRecord, changed: &[ProfileField]) -> String {
    let mut note = String::from("Changed fields:");
    for field in changed {
        note.push_str(&format!(
            "\n{}: '{}' → '{}'",
            field.header(),
            before.get(*field),
            after.get(*field)
        ));
    }
    note
}
