use crate::models::{Point, TextFragment};
use crate::processing::ocr::RecognitionOutput;
use log::{debug, warn};
use std::collections::HashMap;

/// All fragments of one recognition pass, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct FragmentIndex {
    fragments: Vec<TextFragment>,
    positions: HashMap<usize, usize>,
}

/// Fragments sharing a text line, sorted left to right.
#[derive(Debug, Clone)]
pub struct Row<'a> {
    pub fragments: Vec<&'a TextFragment>,
}

impl<'a> Row<'a> {
    pub fn text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn ids(&self) -> Vec<usize> {
        self.fragments.iter().map(|f| f.id).collect()
    }

    pub fn y_center(&self) -> f32 {
        if self.fragments.is_empty() {
            return 0.0;
        }
        self.fragments.iter().map(|f| f.y_center()).sum::<f32>() / self.fragments.len() as f32
    }
}

impl FragmentIndex {
    pub fn new(fragments: Vec<TextFragment>) -> Self {
        let positions = fragments
            .iter()
            .enumerate()
            .map(|(pos, f)| (f.id, pos))
            .collect();
        FragmentIndex {
            fragments,
            positions,
        }
    }

    /// Wrap the recognizer's parallel arrays. Fragment ids are positions in
    /// those arrays; fragments with unusable geometry are dropped.
    pub fn from_recognition(output: &RecognitionOutput) -> Self {
        if output.dt_polys.len() != output.rec_texts.len() {
            warn!(
                "Recognition output has {} polygons but {} texts, using the common prefix",
                output.dt_polys.len(),
                output.rec_texts.len()
            );
        }

        let mut fragments = Vec::with_capacity(output.rec_texts.len());
        for (id, (poly, text)) in output.dt_polys.iter().zip(output.rec_texts.iter()).enumerate() {
            let confidence = output.rec_scores.get(id).copied().unwrap_or(1.0);
            match Self::build_fragment(id, poly, text, confidence) {
                Some(fragment) => fragments.push(fragment),
                None => debug!("Dropping fragment {} ({:?}): degenerate geometry", id, text),
            }
        }

        Self::new(fragments)
    }

    fn build_fragment(id: usize, poly: &[[f32; 2]], text: &str, confidence: f32) -> Option<TextFragment> {
        if poly.len() != 4 || text.trim().is_empty() {
            return None;
        }
        if poly.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return None;
        }

        let polygon = [
            Point::new(poly[0][0], poly[0][1]),
            Point::new(poly[1][0], poly[1][1]),
            Point::new(poly[2][0], poly[2][1]),
            Point::new(poly[3][0], poly[3][1]),
        ];
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };

        let fragment = TextFragment {
            id,
            polygon,
            text: text.to_string(),
            confidence,
        };
        if fragment.area() < 1.0 {
            return None;
        }
        Some(fragment)
    }

    pub fn fragments(&self) -> &[TextFragment] {
        &self.fragments
    }

    pub fn get(&self, id: usize) -> Option<&TextFragment> {
        self.positions.get(&id).map(|&pos| &self.fragments[pos])
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn full_text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Copy of the index restricted to fragments matching `keep`. Ids and
    /// geometry are preserved.
    pub fn subset<F>(&self, keep: F) -> FragmentIndex
    where
        F: Fn(&TextFragment) -> bool,
    {
        FragmentIndex::new(self.fragments.iter().filter(|f| keep(f)).cloned().collect())
    }

    /// Group fragments into text lines. A fragment joins the current line
    /// while its center stays within `threshold` of the line's running
    /// average center.
    pub fn rows(&self, threshold: f32) -> Vec<Row<'_>> {
        let mut sorted: Vec<&TextFragment> = self.fragments.iter().collect();
        sorted.sort_by(|a, b| a.y_center().total_cmp(&b.y_center()));

        let mut rows = Vec::new();
        let mut current: Vec<&TextFragment> = Vec::new();
        let mut center_sum = 0.0;

        for fragment in sorted {
            if !current.is_empty() {
                let average = center_sum / current.len() as f32;
                if (fragment.y_center() - average).abs() >= threshold {
                    rows.push(Self::finish_row(std::mem::take(&mut current)));
                    center_sum = 0.0;
                }
            }
            center_sum += fragment.y_center();
            current.push(fragment);
        }
        if !current.is_empty() {
            rows.push(Self::finish_row(current));
        }
        rows
    }

    fn finish_row(mut fragments: Vec<&TextFragment>) -> Row<'_> {
        fragments.sort_by(|a, b| a.x_start().total_cmp(&b.x_start()));
        Row { fragments }
    }

    /// Fragments starting right of `anchor`'s right edge whose centers are
    /// within `max_dy` vertically.
    pub fn right_of(&self, anchor: &TextFragment, max_dy: f32) -> Vec<&TextFragment> {
        self.fragments
            .iter()
            .filter(|f| f.id != anchor.id)
            .filter(|f| (f.y_center() - anchor.y_center()).abs() < max_dy)
            .filter(|f| f.x_start() > anchor.x_end())
            .collect()
    }

    /// Fragments whose centers lie below `anchor`'s center by at most
    /// `max_dy`.
    pub fn below(&self, anchor: &TextFragment, max_dy: f32) -> Vec<&TextFragment> {
        self.fragments
            .iter()
            .filter(|f| f.id != anchor.id)
            .filter(|f| {
                let dy = f.y_center() - anchor.y_center();
                dy > 0.0 && dy <= max_dy
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_from_recognition_drops_degenerate_fragments() {
        let output = RecognitionOutput {
            dt_polys: vec![
                vec![[0.0, 0.0], [50.0, 0.0], [50.0, 20.0], [0.0, 20.0]],
                vec![[0.0, 0.0], [50.0, 0.0], [50.0, 20.0]],
                vec![[5.0, 5.0], [5.0, 5.0], [5.0, 5.0], [5.0, 5.0]],
                vec![[0.0, 40.0], [80.0, 40.0], [80.0, 60.0], [0.0, 60.0]],
            ],
            rec_texts: vec!["NIK".into(), "bad".into(), "zero".into(), "Nama".into()],
            rec_scores: vec![0.9, 0.9, 0.9, 1.7],
        };

        let index = FragmentIndex::from_recognition(&output);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(0).unwrap().text, "NIK");
        assert!(index.get(1).is_none());
        assert_eq!(index.get(3).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_rows_cluster_by_running_average() {
        let index = index_of(&[
            ("Nama", 10.0, 100.0),
            (":", 120.0, 104.0),
            ("BUDI", 200.0, 98.0),
            ("Alamat", 10.0, 150.0),
            ("JL MAWAR", 200.0, 152.0),
        ]);
        let rows = index.rows(20.0);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text(), "Nama : BUDI");
        assert_eq!(rows[1].ids(), vec![3, 4]);
    }

    #[test]
    fn test_rows_sort_left_to_right() {
        let index = index_of(&[("SANTOSO", 300.0, 50.0), ("BUDI", 100.0, 52.0)]);
        let rows = index.rows(20.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(), "BUDI SANTOSO");
    }

    #[test]
    fn test_directional_queries() {
        let index = index_of(&[
            ("NIK", 10.0, 100.0),
            ("3171020101990001", 150.0, 102.0),
            ("BUDI", 150.0, 140.0),
            ("LEFT", 0.0, 140.0),
        ]);
        let nik = index.get(0).unwrap();
        let right: Vec<usize> = index.right_of(nik, 25.0).iter().map(|f| f.id).collect();
        assert_eq!(right, vec![1]);
        let below: Vec<usize> = index.below(nik, 50.0).iter().map(|f| f.id).collect();
        assert_eq!(below, vec![1, 2, 3]);
    }

    #[test]
    fn test_subset_preserves_ids() {
        let index = index_of(&[("A1", 0.0, 0.0), ("B2", 0.0, 50.0), ("C3", 0.0, 100.0)]);
        let sub = index.subset(|f| f.y_center() < 80.0);
        assert_eq!(sub.len(), 2);
        assert!(sub.get(2).is_none());
        assert_eq!(sub.get(1).unwrap().text, "B2");
    }
}
