/*!
# Passerelle DevKit - Passerelle simulée et utilitaires de test

Bibliothèque pour tester le kernel sans device réel :
- `FakeGateway` : shell distant scripté qui enregistre les commandes reçues
- `UbusDump` : construction de sorties `ubus-cli` réalistes
- `TestHarness` : état applicatif sur répertoire temporaire + routeur Axum
*/

pub mod fake_gateway;
pub mod test_utils;
pub mod ubus_dump;

pub use fake_gateway::FakeGateway;
pub use test_utils::TestHarness;
pub use ubus_dump::UbusDump;
