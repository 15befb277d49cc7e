//! Create/rotate/retire/deregister, the append-only agent log, and tenant
//! (project) resolution.
//!
//! Grounded on `bootstrap.py` (project/agent creation and alias allocation,
//! transliterated from the async Postgres original to synchronous SQLite
//! transactions) and the rotate/retire/deregister preconditions in spec §4.5.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use crate::alias::{candidate_name_prefixes, is_reserved, used_name_prefixes};
use crate::error::AwebError;
use crate::identity::custody::{destroy_signing_key, encrypt_signing_key, sign_on_behalf};
use crate::identity::did::did_from_public_key;
use crate::identity::signing::{canonical_payload, generate_keypair, verify, VerifyOutcome};
use crate::models::{Agent, AgentKind, AgentStatus, AccessPolicy, CustodyMode, Lifetime};

const ALIAS_MAX_LEN: usize = 64;

pub fn validate_project_slug(slug: &str) -> Result<String, AwebError> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(AwebError::Validation("project_slug is required".into()));
    }
    if slug.len() > 256 {
        return Err(AwebError::Validation("project_slug too long".into()));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'))
    {
        return Err(AwebError::Validation("invalid project_slug format".into()));
    }
    Ok(slug.to_string())
}

/// `[A-Za-z0-9][A-Za-z0-9_-]{0,63}`, case-insensitive `me` reserved (spec §3).
pub fn validate_agent_alias(alias: &str) -> Result<String, AwebError> {
    let alias = alias.trim();
    if alias.is_empty() || alias.len() > ALIAS_MAX_LEN {
        return Err(AwebError::Validation("invalid alias format".into()));
    }
    let mut chars = alias.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(AwebError::Validation("invalid alias format".into()));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AwebError::Validation("invalid alias format".into()));
    }
    if is_reserved(alias) {
        return Err(AwebError::Validation("alias 'me' is reserved".into()));
    }
    Ok(alias.to_string())
}

pub struct EnsuredTenant {
    pub project_id: String,
    pub slug: String,
    pub name: String,
}

/// Find-or-create a tenant by slug. Grounded on `bootstrap.py::_resolve_project`'s
/// OSS (slug-keyed, server-generated id) path.
pub fn ensure_tenant(
    conn: &Connection,
    slug: &str,
    name: &str,
) -> Result<EnsuredTenant, AwebError> {
    let slug = validate_project_slug(slug)?;

    let existing: Option<(String, String, String)> = conn
        .query_row(
            "SELECT project_id, slug, name FROM tenants WHERE slug = ?1 AND deleted_at IS NULL",
            [&slug],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| AwebError::Internal(e.to_string()))?;

    if let Some((project_id, slug, name)) = existing {
        return Ok(EnsuredTenant { project_id, slug, name });
    }

    let project_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tenants (project_id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![project_id, slug, name, Utc::now().to_rfc3339()],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    Ok(EnsuredTenant { project_id, slug, name: name.to_string() })
}

pub struct BootstrapResult {
    pub agent: Agent,
    pub api_key: String,
    pub created: bool,
}

/// Find-or-create an agent within `project_id`. When `alias` is `None`, the
/// first unused candidate from the fixed name sequence is allocated.
pub fn bootstrap_identity(
    conn: &Connection,
    project_id: &str,
    alias: Option<&str>,
    human_name: &str,
    kind: AgentKind,
    did: Option<&str>,
    public_key: Option<&str>,
) -> Result<BootstrapResult, AwebError> {
    let (agent, created) = if let Some(alias) = alias {
        let alias = validate_agent_alias(alias)?;
        let existing = fetch_agent_by_alias(conn, project_id, &alias)
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        if let Some(agent) = existing {
            (agent, false)
        } else {
            (insert_agent(conn, project_id, &alias, human_name, kind, did, public_key)?, true)
        }
    } else {
        let mut stmt = conn
            .prepare("SELECT alias FROM agents WHERE project_id = ?1 AND deleted_at IS NULL")
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        let existing_aliases: Vec<String> = stmt
            .query_map([project_id], |r| r.get(0))
            .map_err(|e| AwebError::Internal(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| AwebError::Internal(e.to_string()))?;
        let used = used_name_prefixes(existing_aliases.iter().map(String::as_str));

        let mut allocated = None;
        for candidate in candidate_name_prefixes() {
            if used.contains(&candidate) {
                continue;
            }
            match insert_agent(conn, project_id, &candidate, human_name, kind, did, public_key) {
                Ok(agent) => {
                    allocated = Some(agent);
                    break;
                }
                Err(AwebError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let agent = allocated.ok_or_else(|| {
            AwebError::Conflict("alias candidate sequence exhausted".to_string())
        })?;
        (agent, true)
    };

    let api_key = if created {
        issue_api_key(conn, project_id, &agent.agent_id)?
    } else {
        String::new()
    };

    Ok(BootstrapResult { agent, api_key, created })
}

fn fetch_agent_by_alias(
    conn: &Connection,
    project_id: &str,
    alias: &str,
) -> rusqlite::Result<Option<Agent>> {
    conn.query_row(
        "SELECT agent_id, project_id, alias, display_name, kind, access_policy, did, \
                public_key, custody, lifetime, status, successor_agent_id, created_at \
         FROM agents WHERE project_id = ?1 AND alias = ?2 AND deleted_at IS NULL",
        params![project_id, alias],
        row_to_agent,
    )
    .optional()
}

pub fn fetch_agent_by_id(conn: &Connection, agent_id: &str) -> rusqlite::Result<Option<Agent>> {
    conn.query_row(
        "SELECT agent_id, project_id, alias, display_name, kind, access_policy, did, \
                public_key, custody, lifetime, status, successor_agent_id, created_at \
         FROM agents WHERE agent_id = ?1 AND deleted_at IS NULL",
        [agent_id],
        row_to_agent,
    )
    .optional()
}

pub fn list_agents_for_tenant(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, project_id, alias, display_name, kind, access_policy, did, \
                public_key, custody, lifetime, status, successor_agent_id, created_at \
         FROM agents WHERE project_id = ?1 AND deleted_at IS NULL ORDER BY created_at ASC",
    )?;
    stmt.query_map([project_id], row_to_agent)?.collect()
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    let kind: String = row.get(4)?;
    let access_policy: String = row.get(5)?;
    let custody: Option<String> = row.get(8)?;
    let lifetime: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(Agent {
        agent_id: row.get(0)?,
        project_id: row.get(1)?,
        alias: row.get(2)?,
        display_name: row.get(3)?,
        kind: if kind == "human" { AgentKind::Human } else { AgentKind::Agent },
        access_policy: if access_policy == "contacts_only" {
            AccessPolicy::ContactsOnly
        } else {
            AccessPolicy::Open
        },
        did: row.get(6)?,
        public_key: row.get(7)?,
        custody: custody.map(|c| {
            if c == "custodial" { CustodyMode::Custodial } else { CustodyMode::SelfCustody }
        }),
        lifetime: if lifetime == "ephemeral" { Lifetime::Ephemeral } else { Lifetime::Persistent },
        status: match status.as_str() {
            "retired" => AgentStatus::Retired,
            "deregistered" => AgentStatus::Deregistered,
            _ => AgentStatus::Active,
        },
        successor_agent_id: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn insert_agent(
    conn: &Connection,
    project_id: &str,
    alias: &str,
    human_name: &str,
    kind: AgentKind,
    did: Option<&str>,
    public_key: Option<&str>,
) -> Result<Agent, AwebError> {
    let agent_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let kind_str = match kind {
        AgentKind::Agent => "agent",
        AgentKind::Human => "human",
    };
    let result = conn.execute(
        "INSERT INTO agents (agent_id, project_id, alias, display_name, kind, access_policy, \
                              did, public_key, lifetime, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?7, 'persistent', 'active', ?8)",
        params![agent_id, project_id, alias, human_name, kind_str, did, public_key, now],
    );
    match result {
        Ok(_) => Ok(Agent {
            agent_id,
            project_id: project_id.to_string(),
            alias: alias.to_string(),
            display_name: human_name.to_string(),
            kind,
            access_policy: AccessPolicy::Open,
            did: did.map(String::from),
            public_key: public_key.map(String::from),
            custody: None,
            lifetime: Lifetime::Persistent,
            status: AgentStatus::Active,
            successor_agent_id: None,
            created_at: now,
        }),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(AwebError::Conflict(format!("alias '{alias}' already in use")))
        }
        Err(e) => Err(AwebError::Internal(e.to_string())),
    }
}

fn issue_api_key(conn: &Connection, project_id: &str, agent_id: &str) -> Result<String, AwebError> {
    let api_key = crate::db::generate_api_key();
    let key_prefix = &api_key[..12.min(api_key.len())];
    let key_hash = crate::auth::hash_api_key(&api_key);
    conn.execute(
        "INSERT INTO api_keys (api_key_id, project_id, agent_id, key_hash, key_prefix, \
                                is_active, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            project_id,
            agent_id,
            key_hash,
            key_prefix,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;
    Ok(api_key)
}

fn append_log(
    conn: &Connection,
    agent_id: &str,
    project_id: &str,
    operation: &str,
    prior_did: Option<&str>,
    new_did: Option<&str>,
    signer_did: Option<&str>,
    entry_signature: Option<&str>,
    metadata: serde_json::Value,
) -> Result<(), AwebError> {
    conn.execute(
        "INSERT INTO agent_log (entry_id, agent_id, project_id, operation, prior_did, new_did, \
                                 signer_did, entry_signature, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            uuid::Uuid::new_v4().to_string(),
            agent_id,
            project_id,
            operation,
            prior_did,
            new_did,
            signer_did,
            entry_signature,
            metadata.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;
    Ok(())
}

pub struct RotateOutcome {
    pub agent: Agent,
}

/// Preconditions (spec §4.5): agent active and `persistent`. Validates
/// `did_from_public_key(new_public_key) == new_did` and a rotation signature
/// by the *old* key over `{new_did, old_did, timestamp}`; custodial agents
/// have the server sign on their behalf with the still-stored old key.
pub fn rotate(
    conn: &Connection,
    master_key: Option<&[u8; 32]>,
    agent_id: &str,
    new_did: &str,
    new_public_key: &[u8; 32],
    new_custody: Option<CustodyMode>,
    rotation_signature: Option<&str>,
    timestamp: &str,
) -> Result<RotateOutcome, AwebError> {
    let agent = fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    if agent.status != AgentStatus::Active {
        return Err(AwebError::Conflict("agent is not active".to_string()));
    }
    if agent.lifetime != Lifetime::Persistent {
        return Err(AwebError::Validation("ephemeral agents cannot rotate".to_string()));
    }

    if did_from_public_key(new_public_key) != new_did {
        return Err(AwebError::Validation("new_did does not match new_public_key".to_string()));
    }

    let mut fields = serde_json::Map::new();
    fields.insert("new_did".to_string(), json!(new_did));
    fields.insert("old_did".to_string(), json!(agent.did));
    fields.insert("timestamp".to_string(), json!(timestamp));
    let payload = canonical_payload(&fields);

    let (old_key_signature, old_did) = if agent.custody == Some(CustodyMode::Custodial) {
        let (_, signature, _) = sign_on_behalf(conn, master_key, agent_id, &fields)
            .map_err(|e| AwebError::Internal(format!("custodial signing failed: {e}")))?
            .ok_or_else(|| AwebError::DependencyUnavailable("custodial signing unavailable".into()))?;
        (signature, agent.did.clone())
    } else {
        let outcome = verify(agent.did.as_deref(), &payload, rotation_signature);
        if outcome != VerifyOutcome::Verified {
            return Err(AwebError::Validation("invalid rotation signature".to_string()));
        }
        (
            rotation_signature.unwrap_or_default().to_string(),
            agent.did.clone(),
        )
    };

    let new_custody_str = new_custody.map(|c| match c {
        CustodyMode::Custodial => "custodial",
        CustodyMode::SelfCustody => "self_custody",
    });

    if agent.custody == Some(CustodyMode::Custodial) && new_custody != Some(CustodyMode::Custodial) {
        destroy_signing_key(conn, agent_id);
    }

    let new_public_key_b64 = hex::encode(new_public_key);
    conn.execute(
        "UPDATE agents SET did = ?1, public_key = ?2, custody = ?3 WHERE agent_id = ?4",
        params![new_did, new_public_key_b64, new_custody_str, agent_id],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    append_log(
        conn,
        agent_id,
        &agent.project_id,
        "rotate",
        old_did.as_deref(),
        Some(new_did),
        old_did.as_deref(),
        Some(&old_key_signature),
        json!({}),
    )?;

    crate::identity::rotation::record_rotation(
        conn,
        agent_id,
        old_did.as_deref().unwrap_or_default(),
        new_did,
        Some(&old_key_signature),
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    let agent = fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::Internal("agent vanished after rotate".to_string()))?;

    Ok(RotateOutcome { agent })
}

/// Preconditions: agent active, `persistent`, successor exists in the same
/// tenant and is not the agent itself.
pub fn retire(
    conn: &Connection,
    master_key: Option<&[u8; 32]>,
    agent_id: &str,
    successor_agent_id: &str,
    retirement_proof: Option<&str>,
    timestamp: &str,
) -> Result<Agent, AwebError> {
    let agent = fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    if agent.status != AgentStatus::Active {
        return Err(AwebError::Conflict("agent is not active".to_string()));
    }
    if agent.lifetime != Lifetime::Persistent {
        return Err(AwebError::Validation("ephemeral agents cannot retire".to_string()));
    }
    if successor_agent_id == agent_id {
        return Err(AwebError::Validation("successor cannot be the agent itself".to_string()));
    }
    let successor = fetch_agent_by_id(conn, successor_agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::Validation("successor agent not found".to_string()))?;
    if successor.project_id != agent.project_id {
        return Err(AwebError::Validation("successor must be in the same tenant".to_string()));
    }

    let mut fields = serde_json::Map::new();
    fields.insert("operation".to_string(), json!("retire"));
    fields.insert("successor_agent_id".to_string(), json!(successor_agent_id));
    fields.insert("timestamp".to_string(), json!(timestamp));
    let payload = canonical_payload(&fields);

    let entry_signature = if agent.custody == Some(CustodyMode::Custodial) {
        let (_, signature, _) = sign_on_behalf(conn, master_key, agent_id, &fields)
            .map_err(|e| AwebError::Internal(format!("custodial signing failed: {e}")))?
            .ok_or_else(|| AwebError::DependencyUnavailable("custodial signing unavailable".into()))?;
        signature
    } else {
        let outcome = verify(agent.did.as_deref(), &payload, retirement_proof);
        if outcome != VerifyOutcome::Verified {
            return Err(AwebError::Validation("invalid retirement proof".to_string()));
        }
        retirement_proof.unwrap_or_default().to_string()
    };

    conn.execute(
        "UPDATE agents SET status = 'retired', successor_agent_id = ?1 WHERE agent_id = ?2",
        params![successor_agent_id, agent_id],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    append_log(
        conn,
        agent_id,
        &agent.project_id,
        "retire",
        agent.did.as_deref(),
        agent.did.as_deref(),
        agent.did.as_deref(),
        Some(&entry_signature),
        json!({}),
    )?;

    fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::Internal("agent vanished after retire".to_string()))
}

/// Deregister is only permitted for `ephemeral` agents; persistent agents
/// must retire instead.
pub fn deregister(conn: &Connection, agent_id: &str) -> Result<(), AwebError> {
    let agent = fetch_agent_by_id(conn, agent_id)
        .map_err(|e| AwebError::Internal(e.to_string()))?
        .ok_or_else(|| AwebError::NotFound("agent not found".to_string()))?;

    if agent.lifetime != Lifetime::Ephemeral {
        return Err(AwebError::Forbidden(
            "persistent agents cannot be deregistered; retire instead".to_string(),
        ));
    }

    destroy_signing_key(conn, agent_id);
    conn.execute(
        "UPDATE agents SET status = 'deregistered', deleted_at = ?1 WHERE agent_id = ?2",
        params![Utc::now().to_rfc3339(), agent_id],
    )
    .map_err(|e| AwebError::Internal(e.to_string()))?;

    append_log(
        conn,
        agent_id,
        &agent.project_id,
        "deregister",
        agent.did.as_deref(),
        agent.did.as_deref(),
        agent.did.as_deref(),
        None,
        json!({}),
    )
}

/// Issue a fresh self-custody keypair and seal it for custodial storage.
pub fn generate_and_seal_keypair(master_key: &[u8; 32]) -> (String, [u8; 32], Vec<u8>) {
    let (seed, public_key) = generate_keypair();
    let did = did_from_public_key(&public_key);
    let blob = encrypt_signing_key(&seed, master_key);
    (did, public_key, blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn bootstrap_allocates_first_unused_candidate() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let result =
            bootstrap_identity(&conn, &tenant.project_id, None, "", AgentKind::Agent, None, None)
                .unwrap();
        assert_eq!(result.agent.alias, "alice");
        assert!(result.created);
        assert!(result.api_key.starts_with("aw_sk_"));
    }

    #[test]
    fn bootstrap_is_idempotent_for_existing_alias() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let first = bootstrap_identity(
            &conn,
            &tenant.project_id,
            Some("bob"),
            "",
            AgentKind::Agent,
            None,
            None,
        )
        .unwrap();
        let second = bootstrap_identity(
            &conn,
            &tenant.project_id,
            Some("bob"),
            "",
            AgentKind::Agent,
            None,
            None,
        )
        .unwrap();
        assert_eq!(first.agent.agent_id, second.agent.agent_id);
        assert!(!second.created);
    }

    #[test]
    fn alias_validation_rejects_reserved_and_bad_chars() {
        assert!(validate_agent_alias("me").is_err());
        assert!(validate_agent_alias("bad alias").is_err());
        assert!(validate_agent_alias("alice_01").is_ok());
    }

    #[test]
    fn deregister_rejects_persistent_agents() {
        let db = Db::in_memory();
        let conn = db.conn.lock().unwrap();
        let tenant = ensure_tenant(&conn, "acme", "Acme").unwrap();
        let result = bootstrap_identity(
            &conn,
            &tenant.project_id,
            Some("alice"),
            "",
            AgentKind::Agent,
            None,
            None,
        )
        .unwrap();
        let err = deregister(&conn, &result.agent.agent_id).unwrap_err();
        assert!(matches!(err, AwebError::Forbidden(_)));
    }
}
