//! 3x3 Board Logic
//!
//! Pure functions over the tic-tac-toe grid: placing marks, win detection
//! across the 8 lines, and draw detection. No shared state, no I/O.

/// Side length of the board.
pub const BOARD_SIZE: usize = 3;

/// A single cell mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mark {
    /// Unoccupied cell.
    #[default]
    Empty,
    /// Player 1's mark.
    Cross,
    /// Player 2's mark.
    Nought,
}

impl Mark {
    /// Digit used in the wire board-status string.
    fn status_digit(self) -> char {
        match self {
            Mark::Empty => '0',
            Mark::Cross => '1',
            Mark::Nought => '2',
        }
    }
}

/// Why a placement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlaceError {
    /// Column or row outside 0..=2.
    #[error("coordinates out of range")]
    OutOfRange,
    /// Target cell already holds a mark.
    #[error("cell already occupied")]
    Occupied,
}

/// The 3x3 grid, row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    cells: [[Mark; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark at (col, row), if in range.
    pub fn get(&self, col: usize, row: usize) -> Option<Mark> {
        self.cells.get(row)?.get(col).copied()
    }

    /// Place `mark` at (col, row). Fails without mutating on out-of-range
    /// coordinates or an occupied cell.
    pub fn place(&mut self, col: usize, row: usize, mark: Mark) -> Result<(), PlaceError> {
        if col >= BOARD_SIZE || row >= BOARD_SIZE {
            return Err(PlaceError::OutOfRange);
        }
        if self.cells[row][col] != Mark::Empty {
            return Err(PlaceError::Occupied);
        }
        self.cells[row][col] = mark;
        Ok(())
    }

    /// Whether `mark` holds a full row, column, or diagonal.
    pub fn wins(&self, mark: Mark) -> bool {
        if mark == Mark::Empty {
            return false;
        }
        let rows = (0..BOARD_SIZE).any(|r| (0..BOARD_SIZE).all(|c| self.cells[r][c] == mark));
        let cols = (0..BOARD_SIZE).any(|c| (0..BOARD_SIZE).all(|r| self.cells[r][c] == mark));
        let diag = (0..BOARD_SIZE).all(|i| self.cells[i][i] == mark)
            || (0..BOARD_SIZE).all(|i| self.cells[BOARD_SIZE - 1 - i][i] == mark);
        rows || cols || diag
    }

    /// Whether every cell is occupied.
    pub fn is_full(&self) -> bool {
        self.cells
            .iter()
            .all(|row| row.iter().all(|&c| c != Mark::Empty))
    }

    /// Whether the game is a draw: full board with no winner.
    pub fn is_draw(&self) -> bool {
        self.is_full() && !self.wins(Mark::Cross) && !self.wins(Mark::Nought)
    }

    /// 9-character wire serialization, one digit per cell, index = row*3+col.
    pub fn status_string(&self) -> String {
        self.cells
            .iter()
            .flat_map(|row| row.iter())
            .map(|m| m.status_digit())
            .collect()
    }
}
