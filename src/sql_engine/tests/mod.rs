mod lineage_tests;
