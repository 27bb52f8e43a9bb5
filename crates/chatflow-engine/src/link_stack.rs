/// Where to resume once an injected typebot finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkFrame {
    /// The edge that was pending when the link was entered.
    pub return_edge_id: Option<String>,
    /// The typebot that was active when the link was entered.
    pub typebot_id: String,
}

/// LIFO stack of pending returns for nested typebot links.
#[derive(Debug, Clone, Default)]
pub struct LinkStack {
    frames: Vec<LinkFrame>,
}

impl LinkStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: LinkFrame) {
        self.frames.push(frame);
    }

    /// Pop the most recently entered link.
    pub fn pop(&mut self) -> Option<LinkFrame> {
        self.frames.pop()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
