//! Wire-level (serde) shapes shared between route handlers and the service layer.

use serde::{Deserialize, Serialize};

fn default_priority() -> String {
    "normal".to_string()
}

fn default_limit() -> i64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub project_id: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Agent,
    Human,
}

impl Default for AgentKind {
    fn default() -> Self {
        AgentKind::Agent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    Open,
    ContactsOnly,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        AccessPolicy::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyMode {
    SelfCustody,
    Custodial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    Persistent,
    Ephemeral,
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::Persistent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Retired,
    Deregistered,
}

#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub agent_id: String,
    pub project_id: String,
    pub alias: String,
    pub display_name: String,
    pub kind: AgentKind,
    pub access_policy: AccessPolicy,
    pub did: Option<String>,
    pub public_key: Option<String>,
    pub custody: Option<CustodyMode>,
    pub lifetime: Lifetime,
    pub status: AgentStatus,
    pub successor_agent_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    pub project_slug: String,
    #[serde(default)]
    pub project_name: String,
    pub alias: Option<String>,
    #[serde(default)]
    pub human_name: String,
    #[serde(default)]
    pub agent_type: String,
    pub did: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResponse {
    pub project_id: String,
    pub project_slug: String,
    pub agent_id: String,
    pub alias: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RotateRequest {
    pub new_did: String,
    pub new_public_key: String,
    pub custody: Option<CustodyMode>,
    pub rotation_signature: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetireRequest {
    pub successor_agent_id: String,
    pub retirement_proof: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityFields {
    pub from_did: Option<String>,
    pub to_did: Option<String>,
    pub signature: Option<String>,
    pub signing_key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMailRequest {
    pub to_alias: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub thread_id: Option<String>,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub message_id: String,
    pub from_agent_id: String,
    pub from_alias: String,
    pub to_agent_id: String,
    pub subject: String,
    pub body: String,
    pub priority: String,
    pub thread_id: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_announcement: Option<RotationAnnouncementView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_did: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_did: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationAnnouncementView {
    pub old_did: String,
    pub new_did: String,
    pub timestamp: String,
    pub old_key_signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub to_aliases: Vec<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub hang_on: bool,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub session_id: String,
    pub participants: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendSessionMessageRequest {
    pub body: String,
    #[serde(default)]
    pub leaving: bool,
    #[serde(default)]
    pub hang_on: bool,
    #[serde(flatten)]
    pub identity: IdentityFields,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub session_id: String,
    pub from_agent_id: String,
    pub from_alias: String,
    pub body: String,
    pub sender_leaving: bool,
    pub hang_on: bool,
    pub sender_waiting: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_did: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_did: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkReadRequest {
    pub up_to_message_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingConversation {
    pub session_id: String,
    pub participants: Vec<String>,
    pub last_message: String,
    pub last_from: String,
    pub unread_count: i64,
    pub sender_waiting: bool,
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationAcquireRequest {
    pub resource_key: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_ttl() -> i64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationKeyRequest {
    pub resource_key: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReservationRevokeRequest {
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRenewRequest {
    pub resource_key: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub project_id: String,
    pub resource_key: String,
    pub holder_agent_id: String,
    pub holder_alias: String,
    pub acquired_at: String,
    pub expires_at: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddContactRequest {
    pub address: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub contact_id: String,
    pub address: String,
    pub label: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthIntrospection {
    pub project_id: String,
    pub principal_type: Option<String>,
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<AgentKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub agent_id: String,
    pub alias: String,
    pub status: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchAgentRequest {
    pub access_mode: Option<AccessPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestAliasRequest {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One row of the merged mail+chat view returned by `GET /v1/conversations`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub kind: String,
    pub conversation_id: String,
    pub peer_alias: String,
    pub last_message: String,
    pub last_activity: String,
    pub unread_count: i64,
}
