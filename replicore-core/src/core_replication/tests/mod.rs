/*
    Test suites for core_replication

    Test suite covering:
    - Change vector algebra laws (property based)
    - Detector and conflict store edge cases
    - End-to-end resolution scenarios
    - Convergence under reordered and concurrent delivery
*/

pub mod detector_edge_cases;
