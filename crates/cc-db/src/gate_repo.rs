use crate::util::{decode_enum, encode_enum, from_rfc3339, is_constraint_violation, now, to_rfc3339};
use cc_core::error::GateError;
use cc_core::gates::GateRepository;
use cc_core::types::{
    ConditionId, CreateGateInput, GateId, ProjectId, QualityGate, QualityGateCondition,
    WorkspaceId,
};
use rusqlite::{Connection, Row, params};

const GATE_COLUMNS: &str = "id, workspace_id, project_id, name, is_default, created_at, updated_at";

pub struct GateRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> GateRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<QualityGate>, GateError> {
        let sql = format!("SELECT {GATE_COLUMNS} FROM gates WHERE {clause}");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query(params).map_err(storage)?;
        let mut gates = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            gates.push(map_gate_row(row)?);
        }
        for gate in &mut gates {
            gate.conditions = self.load_conditions(&gate.id)?;
        }
        Ok(gates)
    }

    fn load_conditions(&self, gate_id: &GateId) -> Result<Vec<QualityGateCondition>, GateError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, metric, severity, category, comparator, threshold, enabled FROM gate_conditions WHERE gate_id = ?1 ORDER BY ordinal ASC")
            .map_err(storage)?;
        let mut rows = stmt.query([gate_id.as_str()]).map_err(storage)?;
        let mut conditions = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            conditions.push(map_condition_row(row)?);
        }
        Ok(conditions)
    }

    fn touch(&self, id: &GateId) -> Result<(), GateError> {
        self.conn
            .execute(
                "UPDATE gates SET updated_at = ?1 WHERE id = ?2",
                params![to_rfc3339(&now()), id.as_str()],
            )
            .map_err(storage)?;
        Ok(())
    }
}

fn storage(err: impl std::fmt::Display) -> GateError {
    GateError::Storage {
        message: err.to_string(),
    }
}

impl<'a> GateRepository for GateRepo<'a> {
    fn add(&self, input: CreateGateInput) -> Result<QualityGate, GateError> {
        let created_at = now();
        let gate = QualityGate {
            id: GateId::generate(),
            workspace_id: input.workspace_id,
            project_id: input.project_id,
            name: input.name.trim().to_string(),
            is_default: input.is_default,
            conditions: input
                .conditions
                .into_iter()
                .map(|condition| QualityGateCondition {
                    id: ConditionId::generate(),
                    metric: condition.metric,
                    severity: condition.severity,
                    category: condition.category,
                    comparator: condition.comparator,
                    threshold: condition.threshold,
                    enabled: condition.enabled,
                })
                .collect(),
            created_at,
            updated_at: created_at,
        };
        let sql = format!("INSERT INTO gates ({GATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
        let inserted = self.conn.execute(
            &sql,
            params![
                gate.id.as_str(),
                gate.workspace_id.as_str(),
                gate.project_id.as_ref().map(ProjectId::as_str),
                gate.name,
                gate.is_default,
                to_rfc3339(&gate.created_at),
                to_rfc3339(&gate.updated_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => return Err(GateError::NameConflict),
            Err(err) => return Err(storage(err)),
        }

        let mut stmt = self
            .conn
            .prepare("INSERT INTO gate_conditions (id, gate_id, ordinal, metric, severity, category, comparator, threshold, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)")
            .map_err(storage)?;
        for (ordinal, condition) in gate.conditions.iter().enumerate() {
            stmt.execute(params![
                condition.id.as_str(),
                gate.id.as_str(),
                i64::try_from(ordinal).map_err(storage)?,
                encode_enum(&condition.metric).map_err(storage)?,
                condition
                    .severity
                    .map(|severity| encode_enum(&severity))
                    .transpose()
                    .map_err(storage)?,
                condition
                    .category
                    .map(|category| encode_enum(&category))
                    .transpose()
                    .map_err(storage)?,
                encode_enum(&condition.comparator).map_err(storage)?,
                condition.threshold,
                condition.enabled,
            ])
            .map_err(storage)?;
        }
        Ok(gate)
    }

    fn get(&self, id: &GateId) -> Result<Option<QualityGate>, GateError> {
        Ok(self.query("id = ?1", [id.as_str()])?.into_iter().next())
    }

    fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<QualityGate>, GateError> {
        self.query(
            "workspace_id = ?1 ORDER BY created_at ASC, name ASC",
            [workspace_id.as_str()],
        )
    }

    fn effective_for_project(
        &self,
        workspace_id: &WorkspaceId,
        project_id: &ProjectId,
    ) -> Result<Option<QualityGate>, GateError> {
        let bound = self.query(
            "workspace_id = ?1 AND project_id = ?2 ORDER BY created_at DESC LIMIT 1",
            params![workspace_id.as_str(), project_id.as_str()],
        )?;
        if let Some(gate) = bound.into_iter().next() {
            return Ok(Some(gate));
        }
        Ok(self
            .query(
                "workspace_id = ?1 AND is_default = 1 LIMIT 1",
                [workspace_id.as_str()],
            )?
            .into_iter()
            .next())
    }

    fn set_default(&self, id: &GateId) -> Result<QualityGate, GateError> {
        let gate = self.get(id)?.ok_or(GateError::GateNotFound)?;
        self.conn
            .execute(
                "UPDATE gates SET is_default = 0 WHERE workspace_id = ?1 AND id != ?2",
                params![gate.workspace_id.as_str(), id.as_str()],
            )
            .map_err(storage)?;
        self.conn
            .execute(
                "UPDATE gates SET is_default = 1, updated_at = ?1 WHERE id = ?2",
                params![to_rfc3339(&now()), id.as_str()],
            )
            .map_err(storage)?;
        self.get(id)?.ok_or(GateError::GateNotFound)
    }

    fn set_condition_enabled(
        &self,
        gate_id: &GateId,
        condition_id: &ConditionId,
        enabled: bool,
    ) -> Result<QualityGate, GateError> {
        if self.get(gate_id)?.is_none() {
            return Err(GateError::GateNotFound);
        }
        let affected = self
            .conn
            .execute(
                "UPDATE gate_conditions SET enabled = ?1 WHERE id = ?2 AND gate_id = ?3",
                params![enabled, condition_id.as_str(), gate_id.as_str()],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(GateError::ConditionNotFound);
        }
        self.touch(gate_id)?;
        self.get(gate_id)?.ok_or(GateError::GateNotFound)
    }

    fn remove(&self, id: &GateId) -> Result<(), GateError> {
        self.conn
            .execute("DELETE FROM gate_conditions WHERE gate_id = ?1", [id.as_str()])
            .map_err(storage)?;
        let affected = self
            .conn
            .execute("DELETE FROM gates WHERE id = ?1", [id.as_str()])
            .map_err(storage)?;
        if affected == 0 {
            return Err(GateError::GateNotFound);
        }
        Ok(())
    }
}

fn map_gate_row(row: &Row<'_>) -> Result<QualityGate, GateError> {
    let id: String = row.get(0).map_err(storage)?;
    let workspace_id: String = row.get(1).map_err(storage)?;
    let project_id: Option<String> = row.get(2).map_err(storage)?;
    let created_at: String = row.get(5).map_err(storage)?;
    let updated_at: String = row.get(6).map_err(storage)?;
    Ok(QualityGate {
        id: GateId::new(id).map_err(storage)?,
        workspace_id: WorkspaceId::new(workspace_id).map_err(storage)?,
        project_id: project_id.map(ProjectId::new).transpose().map_err(storage)?,
        name: row.get(3).map_err(storage)?,
        is_default: row.get(4).map_err(storage)?,
        conditions: Vec::new(),
        created_at: from_rfc3339(&created_at).map_err(storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(storage)?,
    })
}

fn map_condition_row(row: &Row<'_>) -> Result<QualityGateCondition, GateError> {
    let id: String = row.get(0).map_err(storage)?;
    let metric: String = row.get(1).map_err(storage)?;
    let severity: Option<String> = row.get(2).map_err(storage)?;
    let category: Option<String> = row.get(3).map_err(storage)?;
    let comparator: String = row.get(4).map_err(storage)?;
    Ok(QualityGateCondition {
        id: ConditionId::new(id).map_err(storage)?,
        metric: decode_enum(&metric).map_err(storage)?,
        severity: severity
            .map(|value| decode_enum(&value))
            .transpose()
            .map_err(storage)?,
        category: category
            .map(|value| decode_enum(&value))
            .transpose()
            .map_err(storage)?,
        comparator: decode_enum(&comparator).map_err(storage)?,
        threshold: row.get(5).map_err(storage)?,
        enabled: row.get(6).map_err(storage)?,
    })
}
