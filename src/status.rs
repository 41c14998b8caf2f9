//! Door status and the presence policy that drives it.

use smartdoor_vision::{DetectError, FaceSet};

use crate::error::DoorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Closed,
    Opened,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Closed => "Door Closed",
            Status::Opened => "Door Opened",
        }
    }

    /// Display colour as RGB.
    pub fn rgb(self) -> [u8; 3] {
        match self {
            Status::Opened => [0x00, 0xFF, 0x04],
            Status::Closed => [0xFF, 0x00, 0x2E],
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map one detection outcome to a status. Failures fail closed.
///
/// Each frame stands alone: there is no smoothing, so a face flickering at
/// the detection threshold makes the status flicker too.
pub fn presence_policy(outcome: Result<FaceSet, DetectError>) -> Status {
    match outcome {
        Ok(faces) if !faces.is_empty() => Status::Opened,
        Ok(_) => Status::Closed,
        Err(e) => {
            log::warn!("{}", DoorError::from(e));
            Status::Closed
        }
    }
}

type Subscriber = Box<dyn FnMut(Status)>;

/// Single-writer status value with change notification.
///
/// Lives on the UI thread; detection results reach it through the binder's
/// event queue, so no locking is needed.
#[derive(Default)]
pub struct StatusCell {
    value: Status,
    updates: u64,
    subscribers: Vec<Subscriber>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Status {
        self.value
    }

    /// Number of `set` calls so far, changed or not.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn subscribe(&mut self, f: impl FnMut(Status) + 'static) {
        self.subscribers.push(Box::new(f));
    }

    /// Overwrite the status. Subscribers hear about it only if it changed.
    pub fn set(&mut self, status: Status) -> bool {
        self.updates += 1;
        if status == self.value {
            return false;
        }
        log::info!("{} -> {}", self.value, status);
        self.value = status;
        for subscriber in &mut self.subscribers {
            subscriber(status);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartdoor_vision::Face;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn faces(n: usize) -> FaceSet {
        FaceSet {
            faces: (0..n)
                .map(|_| Face {
                    bbox: [0.0, 0.0, 10.0, 10.0],
                    score: 0.9,
                    landmarks: None,
                    tracking_id: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_policy() {
        assert_eq!(presence_policy(Ok(faces(1))), Status::Opened);
        assert_eq!(presence_policy(Ok(faces(3))), Status::Opened);
        assert_eq!(presence_policy(Ok(faces(0))), Status::Closed);
        assert_eq!(
            presence_policy(Err(DetectError::Engine(anyhow::anyhow!("boom")))),
            Status::Closed
        );
        assert_eq!(presence_policy(Err(DetectError::Disposed)), Status::Closed);
    }

    #[test]
    fn test_cell_publishes_changes_only() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut cell = StatusCell::new();
        let sink = seen.clone();
        cell.subscribe(move |s| sink.borrow_mut().push(s));

        assert_eq!(cell.get(), Status::Closed);
        assert!(!cell.set(Status::Closed));
        assert!(cell.set(Status::Opened));
        assert!(!cell.set(Status::Opened));
        assert!(cell.set(Status::Closed));

        assert_eq!(cell.updates(), 4);
        assert_eq!(*seen.borrow(), vec![Status::Opened, Status::Closed]);
    }

    #[test]
    fn test_labels_and_colours() {
        assert_eq!(Status::default().label(), "Door Closed");
        assert_eq!(Status::Opened.to_string(), "Door Opened");
        assert_ne!(Status::Opened.rgb(), Status::Closed.rgb());
    }
}
