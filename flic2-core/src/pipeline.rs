//! Signed-request pipeline: FIFO queue with at most two requests awaiting a response.
//!
//! Responses are not matched to requests by id; any response counts as one completion.

use std::collections::VecDeque;

pub const MAX_IN_FLIGHT: i32 = 2;

#[derive(Debug, Default)]
pub struct RequestPipeline {
    queue: VecDeque<Vec<u8>>,
    // Signed: an unsolicited response can push this below zero, widening the window.
    in_flight: i32,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an encoded request. Returns the requests released for sending, in order.
    pub fn push(&mut self, request: Vec<u8>) -> Vec<Vec<u8>> {
        self.queue.push_back(request);
        self.release()
    }

    /// A response arrived. Returns the requests released for sending, in order.
    pub fn response_received(&mut self) -> Vec<Vec<u8>> {
        self.in_flight -= 1;
        self.release()
    }

    fn release(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while self.in_flight < MAX_IN_FLIGHT {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.in_flight += 1;
            out.push(next);
        }
        out
    }

    pub fn in_flight(&self) -> i32 {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
