use std::io;

/// One step in reconstructing a target from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    /// Reuse `length` bytes of the source starting at `offset`.
    Copy { offset: u64, length: u64 },
    /// Emit these bytes verbatim.
    Literal(Vec<u8>),
}

impl DiffOp {
    /// Number of target bytes this operation produces.
    pub fn output_len(&self) -> u64 {
        match self {
            DiffOp::Copy { length, .. } => *length,
            DiffOp::Literal(data) => data.len() as u64,
        }
    }
}

/// Sink for the Copy/Literal operation stream produced by the delta matcher.
///
/// Operations arrive in target order. `close` must be called once at the end
/// so the writer can flush buffered literals and terminate its encoding.
pub trait DiffWriter {
    fn add_copy(&mut self, offset: u64, length: u64) -> io::Result<()>;

    fn add_data(&mut self, data: &[u8]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

impl<T: DiffWriter + ?Sized> DiffWriter for &mut T {
    fn add_copy(&mut self, offset: u64, length: u64) -> io::Result<()> {
        (**self).add_copy(offset, length)
    }

    fn add_data(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).add_data(data)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Writer that keeps the operations in memory, merging adjacent literals.
#[derive(Debug, Default)]
pub struct OpCollector {
    ops: Vec<DiffOp>,
}

impl OpCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ops(self) -> Vec<DiffOp> {
        self.ops
    }
}

impl DiffWriter for OpCollector {
    fn add_copy(&mut self, offset: u64, length: u64) -> io::Result<()> {
        self.ops.push(DiffOp::Copy { offset, length });
        Ok(())
    }

    fn add_data(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self.ops.last_mut() {
            Some(DiffOp::Literal(buf)) => buf.extend_from_slice(data),
            _ => self.ops.push(DiffOp::Literal(data.to_vec())),
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Feed `ops` to `writer` in order, then close it.
pub fn write_ops<W: DiffWriter>(ops: &[DiffOp], mut writer: W) -> io::Result<()> {
    for op in ops {
        match op {
            DiffOp::Copy { offset, length } => writer.add_copy(*offset, *length)?,
            DiffOp::Literal(data) => writer.add_data(data)?,
        }
    }
    writer.close()
}

/// Reconstruct the target by replaying `ops` directly against an in-memory source.
///
/// Returns `None` if a copy reaches outside `source`.
pub fn replay(source: &[u8], ops: &[DiffOp]) -> Option<Vec<u8>> {
    let estimated: u64 = ops.iter().map(DiffOp::output_len).sum();
    let mut result = Vec::with_capacity(estimated as usize);

    for op in ops {
        match op {
            DiffOp::Copy { offset, length } => {
                let start = usize::try_from(*offset).ok()?;
                let end = start.checked_add(usize::try_from(*length).ok()?)?;
                result.extend_from_slice(source.get(start..end)?);
            }
            DiffOp::Literal(data) => result.extend_from_slice(data),
        }
    }

    Some(result)
}
