//! Label (height) accumulator
//!
//! Labels merge with `max`, so a vertex's label never decreases.

/// Push-relabel height of a vertex
pub type Label = u64;

/// Initial label: `|V|` for the source, `0` for every other vertex
pub fn initial(is_source: bool, vertex_count: usize) -> Label {
    if is_source {
        vertex_count as Label
    } else {
        0
    }
}

/// Max-merge of an incoming label into the current one
pub fn merge(current: Label, input: Label) -> Label {
    current.max(input)
}

/// Whether `(u, v)` may carry a push
pub fn is_admissible(own: Label, neighbour: Label, residual: f64) -> bool {
    residual > super::flow::FLOW_EPSILON && own == neighbour + 1
}

/// New label for an overflowing vertex without admissible edges
///
/// `1 + min` over the labels of residual neighbours, merged with the
/// current label. `None` when the vertex has no residual neighbour.
pub fn relabel(current: Label, residual_neighbours: impl IntoIterator<Item = Label>) -> Option<Label> {
    residual_neighbours
        .into_iter()
        .min()
        .map(|lowest| merge(current, lowest + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_labels() {
        assert_eq!(initial(true, 6), 6);
        assert_eq!(initial(false, 6), 0);
    }

    #[test]
    fn test_admissibility_needs_exact_step_and_residual() {
        assert!(is_admissible(3, 2, 1.0));
        assert!(!is_admissible(3, 1, 1.0));
        assert!(!is_admissible(2, 2, 1.0));
        assert!(!is_admissible(3, 2, 0.0));
    }

    #[test]
    fn test_relabel_uses_lowest_neighbour() {
        assert_eq!(relabel(0, [4, 2, 7]), Some(3));
        assert_eq!(relabel(0, []), None);
    }

    #[test]
    fn test_relabel_never_decreases() {
        assert_eq!(relabel(9, [1, 2]), Some(9));
        assert_eq!(merge(5, 3), 5);
    }
}
