use std::collections::HashSet;

use crate::models::Item;

use super::filter::KeywordFilter;

/// Candidates for this pass in scan order.
///
/// Items accepted by `filter` keep their list order, unless a strict majority
/// of them sit in the second half of the open list, in which case the order is
/// reversed so the denser end is scanned first. A repeated label is kept once.
pub fn select(open_items: &[Item], filter: &KeywordFilter) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<Item> = open_items
        .iter()
        .filter(|item| filter.accepts(&item.label))
        .filter(|item| seen.insert(item.label.clone()))
        .cloned()
        .collect();

    if favours_tail(&candidates, open_items.len()) {
        candidates.reverse();
    }
    candidates
}

fn favours_tail(candidates: &[Item], total: usize) -> bool {
    let in_second_half = candidates
        .iter()
        .filter(|item| item.position * 2 >= total)
        .count();
    let in_first_half = candidates.len() - in_second_half;
    in_second_half > in_first_half
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(labels: &[&str]) -> Vec<Item> {
        labels
            .iter()
            .enumerate()
            .map(|(position, label)| Item::new(*label, position))
            .collect()
    }

    fn labels(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    fn include(keywords: &[&str]) -> KeywordFilter {
        KeywordFilter::new(keywords.iter().map(|k| k.to_string()).collect(), Vec::new()).unwrap()
    }

    #[test]
    fn tail_majority_reverses_order() {
        let items = listing(&["a", "b", "c", "d", "e", "f", "g", "x7", "x8", "x9"]);
        let selected = select(&items, &include(&["x"]));
        assert_eq!(labels(&selected), vec!["x9", "x8", "x7"]);
    }

    #[test]
    fn head_majority_keeps_order() {
        let items = listing(&["x0", "x1", "x2", "d", "e", "f", "g", "h", "i", "j"]);
        let selected = select(&items, &include(&["x"]));
        assert_eq!(labels(&selected), vec!["x0", "x1", "x2"]);
    }

    #[test]
    fn head_leaning_split_keeps_order() {
        let items = listing(&["x0", "b", "c", "d", "x4", "x5", "g", "h", "i", "j"]);
        // x0 and x4 in the first half, x5 in the second.
        let selected = select(&items, &include(&["x"]));
        assert_eq!(labels(&selected), vec!["x0", "x4", "x5"]);
    }

    #[test]
    fn even_split_keeps_order() {
        let items = listing(&["x0", "b", "c", "x3"]);
        let selected = select(&items, &include(&["x"]));
        assert_eq!(labels(&selected), vec!["x0", "x3"]);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let items = listing(&["a", "b"]);
        assert!(select(&items, &include(&["zzz"])).is_empty());
        assert!(select(&[], &include(&["a"])).is_empty());
    }

    #[test]
    fn duplicate_labels_collapse_to_first() {
        let items = listing(&["x", "y", "x"]);
        let selected = select(&items, &include(&["x"]));
        assert_eq!(selected, vec![Item::new("x", 0)]);
    }

    #[test]
    fn wildcard_selection_and_exclusions_cover_everything() {
        let pool = ["720 a", "1080 b", "4k c", "720 d", "hdr e", "1080 f", "g", "720 h"];
        for len in 0..=pool.len() {
            for skip in 0..3 {
                let chosen: Vec<&str> = pool.iter().skip(skip).take(len).copied().collect();
                let items = listing(&chosen);
                let filter = KeywordFilter::wildcard(vec!["720".into(), "hdr".into()]).unwrap();

                let selected = select(&items, &filter);
                let mut covered: Vec<&str> = labels(&selected);
                covered.extend(
                    items
                        .iter()
                        .filter(|item| filter.is_excluded(&item.label))
                        .map(|item| item.label.as_str()),
                );
                covered.sort_unstable();

                let mut all = labels(&items);
                all.sort_unstable();
                assert_eq!(covered, all);
            }
        }
    }
}
