use common::{EngineError, Result};

use super::{AnnGraph, MAX_LEVEL, Node};

const MAGIC: &[u8; 4] = b"NANN";
const VERSION: u16 = 1;
const NO_ENTRY: u32 = u32::MAX;

impl AnnGraph {
    /// Binary layout, little endian:
    /// `NANN`, version u16, dim u32, m u32, ef_construction u32, max_level u8,
    /// entry u32, rng_state u64, count u64, then per node: level u8,
    /// `dim` f32 values and for each layer a u32 count followed by u32 links.
    pub fn to_bytes(&self) -> Vec<u8> {
        let per_node = 1 + self.dim * 4 + (self.m_max0 + 1) * 4;
        let mut buf = Vec::with_capacity(31 + self.nodes.len() * per_node);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.m as u32).to_le_bytes());
        buf.extend_from_slice(&(self.ef_construction as u32).to_le_bytes());
        buf.push(self.max_level as u8);
        buf.extend_from_slice(&self.entry_point.unwrap_or(NO_ENTRY).to_le_bytes());
        buf.extend_from_slice(&self.rng_state.to_le_bytes());
        buf.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());

        for node in &self.nodes {
            buf.push((node.neighbors.len() - 1) as u8);
            for value in &node.vector {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            for links in &node.neighbors {
                buf.extend_from_slice(&(links.len() as u32).to_le_bytes());
                for link in links {
                    buf.extend_from_slice(&link.to_le_bytes());
                }
            }
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = reader.u16()?;
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }
        let dim = reader.u32()? as usize;
        let m = reader.u32()? as usize;
        let ef_construction = reader.u32()? as usize;
        let max_level = usize::from(reader.u8()?);
        let entry = reader.u32()?;
        let rng_state = reader.u64()?;
        let count = usize::try_from(reader.u64()?).map_err(|_| corrupt("node count overflow"))?;
        if dim == 0 || m < 2 || max_level > MAX_LEVEL {
            return Err(corrupt("invalid header"));
        }

        let mut graph = Self::new(dim, m, ef_construction);
        graph.rng_state = rng_state;
        graph.max_level = max_level;
        graph.entry_point = match entry {
            NO_ENTRY => None,
            idx if (idx as usize) < count => Some(idx),
            _ => return Err(corrupt("entry point out of range")),
        };
        if graph.entry_point.is_none() != (count == 0) {
            return Err(corrupt("entry point does not match node count"));
        }

        graph.nodes.reserve(count.min(bytes.len() / (dim * 4).max(1)));
        for _ in 0..count {
            let level = usize::from(reader.u8()?);
            if level > max_level {
                return Err(corrupt("node level above graph level"));
            }
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(reader.f32()?);
            }
            let mut neighbors = Vec::with_capacity(level + 1);
            for _ in 0..=level {
                let len = reader.u32()? as usize;
                let mut links = Vec::with_capacity(len.min(graph.m_max0));
                for _ in 0..len {
                    links.push(reader.u32()?);
                }
                neighbors.push(links);
            }
            graph.nodes.push(Node { vector, neighbors });
        }
        if reader.pos != bytes.len() {
            return Err(corrupt("trailing bytes after last node"));
        }

        for node in &graph.nodes {
            for (layer, links) in node.neighbors.iter().enumerate() {
                let valid = links.iter().all(|&link| {
                    graph
                        .nodes
                        .get(link as usize)
                        .is_some_and(|target| target.neighbors.len() > layer)
                });
                if !valid {
                    return Err(corrupt("dangling link"));
                }
            }
        }
        let entry_on_top = graph
            .entry_point
            .is_none_or(|entry| graph.nodes[entry as usize].neighbors.len() == max_level + 1);
        if !entry_on_top {
            return Err(corrupt("entry point is not on the top layer"));
        }
        Ok(graph)
    }
}

fn corrupt(detail: &str) -> EngineError {
    EngineError::Consistency(format!("graph file is corrupt: {detail}"))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| corrupt(&format!("truncated at byte {}", self.pos)))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}
