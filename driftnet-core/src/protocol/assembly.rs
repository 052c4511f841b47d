//! Block bookkeeping for the piece an initiator is downloading

use crate::protocol::PeerMessage;
use crate::torrent::{PieceAssignment, PieceIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Missing,
    Requested,
    Received,
}

/// Tracks which blocks of one piece are requested and which have arrived.
#[derive(Debug)]
pub struct PieceAssembly {
    assignment: PieceAssignment,
    block_size: u32,
    blocks: Vec<BlockState>,
}

impl PieceAssembly {
    pub fn new(assignment: PieceAssignment, block_size: u32) -> Self {
        let count = assignment.length.div_ceil(block_size) as usize;
        Self {
            assignment,
            block_size,
            blocks: vec![BlockState::Missing; count],
        }
    }

    pub fn assignment(&self) -> &PieceAssignment {
        &self.assignment
    }

    pub fn index(&self) -> PieceIndex {
        self.assignment.index
    }

    fn block_len(&self, block: usize) -> u32 {
        let start = block as u32 * self.block_size;
        self.block_size.min(self.assignment.length - start)
    }

    /// Marks every missing block requested and returns the Request messages.
    pub fn request_missing(&mut self) -> Vec<PeerMessage> {
        let mut requests = Vec::new();
        for block in 0..self.blocks.len() {
            if self.blocks[block] == BlockState::Missing {
                self.blocks[block] = BlockState::Requested;
                requests.push(PeerMessage::Request {
                    piece_index: self.assignment.index,
                    offset: block as u32 * self.block_size,
                    length: self.block_len(block),
                });
            }
        }
        requests
    }

    /// Records an arriving block, returning false for anything not
    /// outstanding: wrong piece, unaligned offset, wrong size or a duplicate.
    pub fn accept(&mut self, piece: PieceIndex, offset: u32, len: usize) -> bool {
        if piece != self.assignment.index || offset % self.block_size != 0 {
            return false;
        }
        let block = (offset / self.block_size) as usize;
        if block >= self.blocks.len()
            || self.blocks[block] != BlockState::Requested
            || len != self.block_len(block) as usize
        {
            return false;
        }
        self.blocks[block] = BlockState::Received;
        true
    }

    /// Forgets outstanding requests after the remote chokes us.
    pub fn reset_requested(&mut self) {
        for state in &mut self.blocks {
            if *state == BlockState::Requested {
                *state = BlockState::Missing;
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|state| *state == BlockState::Received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly(length: u32) -> PieceAssembly {
        PieceAssembly::new(
            PieceAssignment {
                index: PieceIndex::new(2),
                length,
                hash: None,
            },
            16384,
        )
    }

    #[test]
    fn test_requests_cover_piece_with_short_tail() {
        let mut assembly = assembly(40000);

        let requests = assembly.request_missing();

        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2],
            PeerMessage::Request {
                piece_index: PieceIndex::new(2),
                offset: 32768,
                length: 40000 - 32768,
            }
        );
        assert!(assembly.request_missing().is_empty());
    }

    #[test]
    fn test_completion_after_all_blocks() {
        let mut assembly = assembly(20000);
        assembly.request_missing();

        assert!(assembly.accept(PieceIndex::new(2), 0, 16384));
        assert!(!assembly.is_complete());
        assert!(!assembly.accept(PieceIndex::new(2), 0, 16384));
        assert!(!assembly.accept(PieceIndex::new(2), 16384, 10));
        assert!(assembly.accept(PieceIndex::new(2), 16384, 20000 - 16384));
        assert!(assembly.is_complete());
    }

    #[test]
    fn test_unrequested_or_foreign_blocks_rejected() {
        let mut assembly = assembly(16384);
        assert!(!assembly.accept(PieceIndex::new(2), 0, 16384));

        assembly.request_missing();
        assert!(!assembly.accept(PieceIndex::new(3), 0, 16384));
        assert!(!assembly.accept(PieceIndex::new(2), 100, 16284));
    }

    #[test]
    fn test_choke_resets_outstanding_requests() {
        let mut assembly = assembly(32768);
        assembly.request_missing();
        assert!(assembly.accept(PieceIndex::new(2), 0, 16384));

        assembly.reset_requested();
        let again = assembly.request_missing();

        assert_eq!(again.len(), 1);
        assert!(matches!(again[0], PeerMessage::Request { offset: 16384, .. }));
    }
}
