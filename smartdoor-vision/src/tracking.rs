use crate::detector::Face;

const MATCH_IOU: f32 = 0.3;

/// Intersection over union of two `[x, y, w, h]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Keeps face ids stable across consecutive frames.
///
/// Greedy association: highest-scoring faces pick first among the previous
/// frame's boxes. Unmatched faces get a fresh id; unmatched tracks are
/// forgotten.
#[derive(Debug, Default)]
pub struct IouTracker {
    tracks: Vec<(u32, [f32; 4])>,
    next_id: u32,
}

impl IouTracker {
    pub fn assign(&mut self, faces: &mut [Face]) {
        let mut order: Vec<usize> = (0..faces.len()).collect();
        order.sort_by(|&a, &b| faces[b].score.total_cmp(&faces[a].score));

        let mut taken = vec![false; self.tracks.len()];
        let mut next = Vec::with_capacity(faces.len());
        for idx in order {
            let bbox = faces[idx].bbox;
            let best = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(t, _)| !taken[*t])
                .map(|(t, (_, prev))| (t, iou(prev, &bbox)))
                .filter(|(_, overlap)| *overlap >= MATCH_IOU)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let id = match best {
                Some((t, _)) => {
                    taken[t] = true;
                    self.tracks[t].0
                }
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    id
                }
            };
            faces[idx].tracking_id = Some(id);
            next.push((id, bbox));
        }
        self.tracks = next;
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}
