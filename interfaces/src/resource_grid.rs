//! Resource Grid for 5G NR
//!
//! Frequency-domain storage of one slot for every antenna port. Subcarrier
//! zero is the first subcarrier of common resource block zero (point A).

use crate::InterfaceError;
use ndarray::{s, Array3, ArrayView1};
use num_complex::Complex32;
use tracing::debug;

/// Number of subcarriers per resource block
pub const SUBCARRIERS_PER_RB: usize = 12;

/// Read access to a resource grid
///
/// Implementations must allow concurrent readers.
pub trait ResourceGridReader: Send + Sync {
    /// Number of antenna ports
    fn nof_ports(&self) -> usize;

    /// Number of OFDM symbols
    fn nof_symbols(&self) -> usize;

    /// Number of subcarriers
    fn nof_subc(&self) -> usize;

    /// Get a single resource element
    fn get(&self, port: usize, symbol: usize, subcarrier: usize) -> Complex32;

    /// Read contiguous resource elements starting at `k_init`
    fn get_range(&self, symbols: &mut [Complex32], port: usize, symbol: usize, k_init: usize) {
        for (i, value) in symbols.iter_mut().enumerate() {
            *value = self.get(port, symbol, k_init + i);
        }
    }

    /// Read the resource elements selected by `mask`, starting at `k_init`
    ///
    /// Returns the number of elements written into `symbols`.
    fn get_masked(
        &self,
        symbols: &mut [Complex32],
        port: usize,
        symbol: usize,
        k_init: usize,
        mask: &[bool],
    ) -> usize {
        let mut count = 0;
        for (k, _) in mask.iter().enumerate().filter(|(_, used)| **used) {
            symbols[count] = self.get(port, symbol, k_init + k);
            count += 1;
        }
        count
    }
}

/// Write access to a resource grid
pub trait ResourceGridWriter {
    /// Write contiguous resource elements starting at `k_init`
    fn put(
        &mut self,
        port: usize,
        symbol: usize,
        k_init: usize,
        symbols: &[Complex32],
    ) -> Result<(), InterfaceError>;

    /// Write a single resource element
    fn put_re(
        &mut self,
        port: usize,
        symbol: usize,
        subcarrier: usize,
        value: Complex32,
    ) -> Result<(), InterfaceError> {
        self.put(port, symbol, subcarrier, &[value])
    }
}

/// Resource grid for one slot
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 3D grid: [ports, symbols, subcarriers]
    grid: Array3<Complex32>,
    /// Number of resource blocks
    num_rbs: usize,
}

impl ResourceGrid {
    /// Create a new zeroed resource grid
    pub fn new(nof_ports: usize, nof_symbols: usize, num_rbs: usize) -> Self {
        debug!(
            "Creating resource grid with dimensions: ({}, {}, {})",
            nof_ports,
            nof_symbols,
            num_rbs * SUBCARRIERS_PER_RB
        );
        let grid = Array3::zeros((nof_ports, nof_symbols, num_rbs * SUBCARRIERS_PER_RB));
        Self { grid, num_rbs }
    }

    /// Number of resource blocks
    pub fn num_rbs(&self) -> usize {
        self.num_rbs
    }

    /// Clear the entire grid
    pub fn clear(&mut self) {
        self.grid.fill(Complex32::new(0.0, 0.0));
    }

    fn check_bounds(&self, port: usize, symbol: usize, start: usize, end: usize) -> Result<(), InterfaceError> {
        if port >= self.nof_ports() {
            return Err(InterfaceError::InvalidPort { port, nof_ports: self.nof_ports() });
        }
        if symbol >= self.nof_symbols() {
            return Err(InterfaceError::InvalidSymbol { symbol, nof_symbols: self.nof_symbols() });
        }
        if end > self.nof_subc() {
            return Err(InterfaceError::InvalidSubcarrier { start, end, nof_subc: self.nof_subc() });
        }
        Ok(())
    }
}

impl ResourceGridReader for ResourceGrid {
    fn nof_ports(&self) -> usize {
        self.grid.dim().0
    }

    fn nof_symbols(&self) -> usize {
        self.grid.dim().1
    }

    fn nof_subc(&self) -> usize {
        self.grid.dim().2
    }

    fn get(&self, port: usize, symbol: usize, subcarrier: usize) -> Complex32 {
        assert!(
            port < self.nof_ports() && symbol < self.nof_symbols() && subcarrier < self.nof_subc(),
            "Resource element ({}, {}, {}) out of grid bounds {:?}",
            port,
            symbol,
            subcarrier,
            self.grid.dim()
        );
        self.grid[(port, symbol, subcarrier)]
    }

    fn get_range(&self, symbols: &mut [Complex32], port: usize, symbol: usize, k_init: usize) {
        let end = k_init + symbols.len();
        assert!(
            self.check_bounds(port, symbol, k_init, end).is_ok(),
            "Range read ({}, {}, {}..{}) out of grid bounds {:?}",
            port,
            symbol,
            k_init,
            end,
            self.grid.dim()
        );
        let row = self.grid.slice(s![port, symbol, k_init..end]);
        for (dst, src) in symbols.iter_mut().zip(row.iter()) {
            *dst = *src;
        }
    }
}

impl ResourceGridWriter for ResourceGrid {
    fn put(
        &mut self,
        port: usize,
        symbol: usize,
        k_init: usize,
        symbols: &[Complex32],
    ) -> Result<(), InterfaceError> {
        let end = k_init + symbols.len();
        self.check_bounds(port, symbol, k_init, end)?;
        self.grid
            .slice_mut(s![port, symbol, k_init..end])
            .assign(&ArrayView1::from(symbols));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_grid_creation() {
        let grid = ResourceGrid::new(2, 14, 52);

        assert_eq!(grid.num_rbs(), 52);
        assert_eq!(grid.nof_subc(), 52 * 12);
        assert_eq!(grid.nof_ports(), 2);
        assert_eq!(grid.nof_symbols(), 14);
    }

    #[test]
    fn test_resource_element_mapping() {
        let mut grid = ResourceGrid::new(1, 14, 10);

        let value = Complex32::new(1.0, -0.5);
        grid.put_re(0, 3, 17, value).unwrap();

        assert_eq!(grid.get(0, 3, 17), value);
        assert_eq!(grid.get(0, 3, 18), Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_range_read() {
        let mut grid = ResourceGrid::new(1, 14, 10);

        let values = [Complex32::new(1.0, 0.0); 12];
        grid.put(0, 0, 24, &values).unwrap();

        let mut read = [Complex32::new(0.0, 0.0); 12];
        grid.get_range(&mut read, 0, 0, 24);
        assert_eq!(read, values);
        grid.clear();
        assert_eq!(grid.get(0, 0, 24), Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_masked_read() {
        let mut grid = ResourceGrid::new(1, 1, 1);
        let values: Vec<Complex32> = (0..12).map(|i| Complex32::new(i as f32, 0.0)).collect();
        grid.put(0, 0, 0, &values).unwrap();

        let mask: Vec<bool> = (0..12).map(|k| k % 2 == 1).collect();
        let mut read = [Complex32::new(0.0, 0.0); 12];
        let count = grid.get_masked(&mut read, 0, 0, 0, &mask);
        assert_eq!(count, 6);
        assert_eq!(read[0].re, 1.0);
        assert_eq!(read[5].re, 11.0);
    }

    #[test]
    fn test_out_of_bounds_write() {
        let mut grid = ResourceGrid::new(1, 14, 1);
        let values = [Complex32::new(1.0, 0.0); 4];
        assert_eq!(
            grid.put(0, 0, 10, &values),
            Err(InterfaceError::InvalidSubcarrier { start: 10, end: 14, nof_subc: 12 })
        );
        assert!(matches!(grid.put(1, 0, 0, &values), Err(InterfaceError::InvalidPort { .. })));
    }
}
