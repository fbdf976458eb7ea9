//! # Thumbstack
//!
//! Declares the infrastructure of a serverless image-thumbnailing app and
//! synthesizes it into provisioning-engine input. Uploads to an `images`
//! bucket trigger a `resize` function writing to a `resized` bucket; failed
//! resizes end up as an email through a failure topic; a static website
//! bucket serves the frontend.
//!
//! Nothing here talks to a cloud. The output is a set of ordered stack
//! documents plus content-addressed function archives; applying them is the
//! provisioning engine's job.
//!
//! # Architecture: Three-Stage Pipeline
//!
//! ```text
//! 1. Bundle      lambdas/<fn>/   →  assets/<fn>/<hash>/archive.zip
//! 2. Declare     config + hashes →  StackBuilder graphs (backend, frontend)
//! 3. Synthesize  graphs          →  stacks/<name>/cdk.tf.json + manifest.json
//! ```
//!
//! Bundling finishes before anything is declared because the archive hash is
//! part of each function's config. Declaring is a single in-memory pass;
//! synthesis validates the graph and fixes the creation order the engine
//! must respect.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`platform`] | Build host detection and function target platforms |
//! | [`bundle`] | Policy-driven dependency install, deterministic archives, content hashes |
//! | [`cache`] | Asset manifest: which functions changed since the last run |
//! | [`value`] | Config values and lazy attribute references |
//! | [`resource`] | Resource kinds and their provider type names |
//! | [`graph`] | Stack builder, reference validation, topological synthesis |
//! | [`routing`] | Upload trigger, failure topic, dead-letter wiring, invocation lifecycle |
//! | [`parameters`] | Publishing and resolving well-known parameter paths |
//! | [`outputs`] | Stack outputs and the unavailable sentinel |
//! | [`stacks`] | The concrete backend and frontend stacks |
//! | [`synth`] | The pipeline driver |
//! | [`config`] | `stack.toml` loading, validation, merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Lazy References, Checked Early
//!
//! A declared node hands out [`value::AttrRef`]s instead of values. The
//! reference is validated when the node using it is declared (it must point
//! at an earlier node of the same stack) and rendered as an interpolation
//! expression at synthesis. Since references can only point backward, the
//! only way to build a cycle is an explicit `depends_on`, and synthesis
//! catches that.
//!
//! ## Unavailable Is Not Empty
//!
//! Values read from an optional resource are [`outputs::Availability`]
//! values. When they reach a generated artifact they are written as
//! `__UNAVAILABLE__`, never as an empty string, so a missing bucket shows up
//! as a visible marker in `.env.local` instead of a silently blank variable.
//!
//! ## Host Differences Live in a Table
//!
//! Installing native wheels for a Linux function differs between a Linux
//! and a macOS build host. The differences are rows of a
//! [`bundle::BundlePolicy`] keyed by `(host, target)`; the bundler itself
//! never branches on the host, and archives hash the same everywhere.

pub mod bundle;
pub mod cache;
pub mod config;
pub mod graph;
pub mod output;
pub mod outputs;
pub mod parameters;
pub mod platform;
pub mod resource;
pub mod routing;
pub mod stacks;
pub mod synth;
pub mod value;

#[cfg(test)]
pub(crate) mod test_helpers;
