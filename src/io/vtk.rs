//! Legacy VTK (`.vtk`) writer for forest meshes.
//!
//! Writes an ASCII `UNSTRUCTURED_GRID` with one `VTK_LINE`, `VTK_PIXEL` or `VTK_VOXEL` per
//! owned active cell. Both pixel and voxel expect lexicographic corner order, which is the
//! order cells store their vertices in. Refinement level and owner are written as
//! `FIELD` cell data.

use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::topology::vertex::VertexId;
use hashbrown::HashMap;
use std::io::Write;

const FIELD_LEVEL: &str = "level";
const FIELD_OWNER: &str = "owner";

#[derive(Debug, Default, Clone)]
pub struct VtkWriter {
    title: Option<String>,
}

impl VtkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }

    fn vtk_cell_type(dim: usize) -> Result<i32, MeshError> {
        match dim {
            1 => Ok(3),
            2 => Ok(8),
            3 => Ok(11),
            _ => Err(MeshError::InvalidGeometry(format!(
                "no VTK cell type for dimension {dim}"
            ))),
        }
    }

    fn write_field_array<W: Write>(
        writer: &mut W,
        name: &str,
        num_tuples: usize,
        data_type: &str,
        values: &[String],
    ) -> Result<(), MeshError> {
        writeln!(writer, "{name} 1 {num_tuples} {data_type}")?;
        let mut line_len = 0usize;
        for value in values {
            if line_len + value.len() + 1 > 70 {
                writeln!(writer)?;
                line_len = 0;
            }
            if line_len > 0 {
                write!(writer, " ")?;
                line_len += 1;
            }
            write!(writer, "{value}")?;
            line_len += value.len();
        }
        writeln!(writer)?;
        Ok(())
    }

    pub fn write<W, M, const D: usize>(&self, mut writer: W, mesh: &M) -> Result<(), MeshError>
    where
        W: Write,
        M: MeshTopology<D>,
    {
        let store = mesh.store();
        let vtk_type = Self::vtk_cell_type(D)?;
        let cells = mesh.owned_active_cells();

        let mut point_index: HashMap<VertexId, usize> = HashMap::new();
        let mut points: Vec<VertexId> = Vec::new();
        let mut connectivity = Vec::with_capacity(cells.len());
        let mut levels = Vec::with_capacity(cells.len());
        let mut owners = Vec::with_capacity(cells.len());
        for &id in &cells {
            let cell = store.cell(id)?;
            let local: Vec<usize> = cell
                .vertices()
                .iter()
                .map(|&v| {
                    *point_index.entry(v).or_insert_with(|| {
                        points.push(v);
                        points.len() - 1
                    })
                })
                .collect();
            connectivity.push(local);
            levels.push(cell.level().to_string());
            owners.push(cell.owner().unwrap_or(0).to_string());
        }

        writeln!(writer, "# vtk DataFile Version 3.0")?;
        writeln!(writer, "{}", self.title.as_deref().unwrap_or("mesh-forest"))?;
        writeln!(writer, "ASCII")?;
        writeln!(writer, "DATASET UNSTRUCTURED_GRID")?;
        writeln!(writer, "POINTS {} double", points.len())?;
        for &v in &points {
            let x = store.vertex_position(v);
            let mut values = [0.0f64; 3];
            for (slot, value) in values.iter_mut().zip(x.iter()) {
                *slot = *value;
            }
            writeln!(writer, "{} {} {}", values[0], values[1], values[2])?;
        }

        let per_cell = 1usize << D;
        writeln!(writer, "CELLS {} {}", cells.len(), cells.len() * (per_cell + 1))?;
        for local in &connectivity {
            write!(writer, "{}", local.len())?;
            for idx in local {
                write!(writer, " {idx}")?;
            }
            writeln!(writer)?;
        }

        writeln!(writer, "CELL_TYPES {}", cells.len())?;
        for _ in &cells {
            writeln!(writer, "{vtk_type}")?;
        }

        writeln!(writer, "CELL_DATA {}", cells.len())?;
        writeln!(writer, "FIELD FieldData 2")?;
        Self::write_field_array(&mut writer, FIELD_LEVEL, cells.len(), "int", &levels)?;
        Self::write_field_array(&mut writer, FIELD_OWNER, cells.len(), "int", &owners)?;
        log::debug!(
            "vtk: wrote {} cells, {} points",
            cells.len(),
            points.len()
        );
        Ok(())
    }
}
