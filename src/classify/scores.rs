/// Winning class of one score vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TopClass {
    pub index: usize,
    pub score: f32,
}

/// Index and value of the highest score.
///
/// Scans left to right with a strict `>`, so when several entries share the
/// maximum the lowest index wins. A NaN compares false, so it never displaces
/// the current leader and a leading NaN is never displaced. Returns `None` for
/// an empty vector.
pub fn argmax(scores: &[f32]) -> Option<TopClass> {
    let (&first, rest) = scores.split_first()?;
    let mut top = TopClass {
        index: 0,
        score: first,
    };
    for (offset, &score) in rest.iter().enumerate() {
        if score > top.score {
            top = TopClass {
                index: offset + 1,
                score,
            };
        }
    }
    Some(top)
}
