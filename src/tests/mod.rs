// Cross-module tests for chatsync
// - helpers: in-process push server and scriptable API fake
// - api_tests: REST client against an HTTP server on an ephemeral port
// - session_tests: end-to-end session behavior over the fakes
// - transport_tests: Socket.IO framing, subscriptions and teardown
// - tui_tests: App state transitions and rendering

mod helpers;
mod session_tests;
